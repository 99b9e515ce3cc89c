#[must_use]
pub const fn bool_true() -> bool {
    true
}
