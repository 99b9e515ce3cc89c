use std::fs::{read_to_string, write};

use arbor_network_primitives::config::{BootstrapConfig, DiscoveryConfig, SwarmConfig};
use arbor_tree::TreeConfig;
use camino::Utf8Path;
use eyre::{Result as EyreResult, WrapErr};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.toml";

#[cfg(test)]
#[path = "tests/lib.rs"]
mod tests;

#[derive(Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct ConfigFile {
    #[serde(
        with = "serde_identity",
        default = "libp2p_identity::Keypair::generate_ed25519"
    )]
    pub identity: libp2p_identity::Keypair,

    #[serde(flatten)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub tree: TreeConfig,
}

#[derive(Debug, Deserialize, Serialize)]
#[non_exhaustive]
pub struct NetworkConfig {
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl NetworkConfig {
    #[must_use]
    pub const fn new(swarm: SwarmConfig, bootstrap: BootstrapConfig, discovery: DiscoveryConfig) -> Self {
        Self {
            swarm,
            bootstrap,
            discovery,
        }
    }
}

impl ConfigFile {
    #[must_use]
    pub const fn new(identity: libp2p_identity::Keypair, network: NetworkConfig, tree: TreeConfig) -> Self {
        Self {
            identity,
            network,
            tree,
        }
    }

    #[must_use]
    pub fn exists(dir: &Utf8Path) -> bool {
        dir.join(CONFIG_FILE).is_file()
    }

    pub fn load(dir: &Utf8Path) -> EyreResult<Self> {
        let path = dir.join(CONFIG_FILE);
        let content = read_to_string(&path)
            .wrap_err_with(|| format!("failed to read configuration from {path:?}"))?;

        let config: Self = toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse configuration in {path:?}"))?;

        let _protocol = config
            .tree
            .validate()
            .wrap_err_with(|| format!("invalid tree section in {path:?}"))?;

        Ok(config)
    }

    pub fn save(&self, dir: &Utf8Path) -> EyreResult<()> {
        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self)?;

        write(&path, content).wrap_err_with(|| format!("failed to write configuration to {path:?}"))?;

        Ok(())
    }
}

pub mod serde_identity {
    use core::fmt::{self, Formatter};

    use libp2p_identity::Keypair;
    use serde::de::{self, MapAccess};
    use serde::ser::{self, SerializeMap};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(key: &Keypair, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut keypair = serializer.serialize_map(Some(2))?;
        keypair.serialize_entry("peer_id", &key.public().to_peer_id().to_base58())?;
        keypair.serialize_entry(
            "keypair",
            &bs58::encode(&key.to_protobuf_encoding().map_err(ser::Error::custom)?).into_string(),
        )?;
        keypair.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Keypair, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdentityVisitor;

        impl<'de> de::Visitor<'de> for IdentityVisitor {
            type Value = Keypair;

            fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str("an identity")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut peer_id = None::<String>;
                let mut priv_key = None::<String>;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "peer_id" => peer_id = Some(map.next_value()?),
                        "keypair" => priv_key = Some(map.next_value()?),
                        _ => {}
                    }
                }

                let peer_id = peer_id.ok_or_else(|| de::Error::missing_field("peer_id"))?;
                let priv_key = priv_key.ok_or_else(|| de::Error::missing_field("keypair"))?;

                let decoded_priv_key = bs58::decode(&priv_key)
                    .into_vec()
                    .map_err(de::Error::custom)?;

                let keypair =
                    Keypair::from_protobuf_encoding(&decoded_priv_key).map_err(de::Error::custom)?;

                let derived = keypair.public().to_peer_id().to_base58();
                if derived != peer_id {
                    return Err(de::Error::custom(format!(
                        "peer_id {peer_id} does not match keypair ({derived})"
                    )));
                }

                Ok(keypair)
            }
        }

        deserializer.deserialize_map(IdentityVisitor)
    }
}
