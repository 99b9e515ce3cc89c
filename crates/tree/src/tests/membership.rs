use arbor_network_primitives::stream::Stream;
use arbor_primitives::message::MessageType;

use super::*;

fn child_with_size(size: usize) -> Child {
    let (stream, _remote) = Stream::pair(PeerId::random(), PeerId::random());
    let (sender, _receiver) = stream.split();

    let child = Child::new(sender, CancellationToken::new());
    child.report.lock().size = size;
    child
}

fn membership_with_sizes(sizes: &[usize]) -> (Membership, Vec<PeerId>) {
    let mut membership = Membership::new(Fanout::new(sizes.len(), sizes.len()));
    let mut ids = Vec::new();

    for &size in sizes {
        let child = child_with_size(size);
        ids.push(child.id());
        assert!(membership.insert(child).is_none(), "fresh peer ids");
    }

    (membership, ids)
}

#[test]
fn test_fresh_membership_counts_only_itself() {
    let membership = Membership::new(Fanout::new(2, 3));

    assert_eq!(membership.size(), 1, "a node always counts itself");
    assert_eq!(membership.descendants(), 0, "no descendants yet");
}

#[test]
fn test_fresh_child_counts_as_one() {
    let (membership, _) = membership_with_sizes(&[1]);

    assert_eq!(membership.size(), 2, "self plus one child");
}

#[test]
fn test_least_loaded_picks_smallest_and_bumps_it() {
    let (mut membership, ids) = membership_with_sizes(&[3, 1, 4]);
    let lightest = ids[1];

    assert_eq!(
        membership.least_loaded(),
        Some(lightest),
        "child of size 1 must be chosen"
    );

    let snapshot = membership
        .snapshots()
        .into_iter()
        .find(|snapshot| snapshot.peer == lightest)
        .unwrap();
    assert_eq!(snapshot.size, 2, "redirect counts against the chosen child");
}

#[test]
fn test_least_loaded_spreads_consecutive_redirects() {
    let (mut membership, ids) = membership_with_sizes(&[2, 1]);

    let first = membership.least_loaded().unwrap();
    let second = membership.least_loaded().unwrap();

    assert_eq!(first, ids[1], "lighter child first");
    assert!(
        ids.contains(&second),
        "second redirect lands on one of the two tied children"
    );
    assert_eq!(membership.descendants(), 5, "both redirects accounted for");
}

#[test]
fn test_least_loaded_without_children() {
    let mut membership = Membership::new(Fanout::new(1, 1));

    assert_eq!(membership.least_loaded(), None, "nobody to redirect to");
}

#[test]
fn test_state_report_lists_children_and_descendants() {
    let (membership, ids) = membership_with_sizes(&[2, 3]);

    let report = membership.state_report();

    assert_eq!(report.kind, MessageType::State, "state message");
    assert_eq!(report.num_peers, 5, "descendants exclude the node itself");

    let mut reported = identity::decode_all(&report.peers).unwrap();
    reported.sort_unstable();
    let mut expected = ids;
    expected.sort_unstable();
    assert_eq!(reported, expected, "every child is listed");
}

#[test]
fn test_retire_hands_back_orphans_and_stops_loop() {
    let child = child_with_size(3);
    child.report.lock().children = vec!["g1".to_owned(), "g2".to_owned()];
    let token = child.token.clone();

    let orphans = child.retire();

    assert_eq!(orphans, ["g1", "g2"], "last reported children are orphaned");
    assert!(token.is_cancelled(), "report loop is told to stop");
}

#[test]
fn test_fanout_from_welcome_validates() {
    let good = Message::update(vec![], 2, 4);
    assert_eq!(
        Fanout::from_welcome(&good).unwrap(),
        Fanout::new(2, 4),
        "valid fan-out accepted"
    );

    let inverted = Message::update(vec![], 4, 2);
    assert!(
        matches!(
            Fanout::from_welcome(&inverted),
            Err(ProtocolViolation::InvalidFanout { .. })
        ),
        "max below width rejected"
    );

    let empty = Message::update(vec![], 0, 0);
    assert!(
        Fanout::from_welcome(&empty).is_err(),
        "zero width rejected"
    );
}
