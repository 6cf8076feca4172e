//! Integration ("block") references and their resolved packages.

use serde::{Deserialize, Serialize};

/// How a block is distributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageType {
    /// Uploaded archive, content fetched by file id
    Archive,
    /// Published to a package registry, resolved by reference only
    Registry,
}

/// Who maintains a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockType {
    /// Maintained with the platform
    Official,
    /// Maintained by a project/platform owner
    Custom,
}

/// A step's reference to a block, possibly by version range
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRef {
    /// Block package name
    pub name: String,
    /// Requested version; an exact literal or a range such as `^1.0.0`
    pub version: String,
    /// Block type
    pub block_type: BlockType,
    /// Package type
    pub package_type: PackageType,
}

impl BlockRef {
    /// Whether the requested version is already an exact semver literal
    pub fn is_exact_version(&self) -> bool {
        semver::Version::parse(self.version.trim()).is_ok()
    }
}

/// Catalog metadata for one block version, as served by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMetadata {
    /// Block package name
    pub name: String,
    /// Exact version the catalog resolved the request to
    pub version: String,
    /// Block type
    pub block_type: BlockType,
    /// Package type
    pub package_type: PackageType,
    /// File id of the archive (archive packages only)
    #[serde(default)]
    pub archive_id: Option<String>,
    /// Display name
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Resolved, exact-version descriptor of one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "packageType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockPackage {
    /// Archive package with its content
    Archive {
        /// Block package name
        name: String,
        /// Exact version
        version: String,
        /// Block type
        #[serde(rename = "blockType")]
        block_type: BlockType,
        /// Archive bytes, base64 on the wire
        #[serde(with = "base64_bytes")]
        archive: Vec<u8>,
    },
    /// Registry package, referenced by name and exact version
    Registry {
        /// Block package name
        name: String,
        /// Exact version
        version: String,
        /// Block type
        #[serde(rename = "blockType")]
        block_type: BlockType,
    },
}

impl BlockPackage {
    /// Block package name
    pub fn name(&self) -> &str {
        match self {
            BlockPackage::Archive { name, .. } | BlockPackage::Registry { name, .. } => name,
        }
    }

    /// Exact version
    pub fn version(&self) -> &str {
        match self {
            BlockPackage::Archive { version, .. } | BlockPackage::Registry { version, .. } => version,
        }
    }

    /// Package type
    pub fn package_type(&self) -> PackageType {
        match self {
            BlockPackage::Archive { .. } => PackageType::Archive,
            BlockPackage::Registry { .. } => PackageType::Registry,
        }
    }
}

mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block_ref(version: &str) -> BlockRef {
        BlockRef {
            name: "@cascade/block-slack".to_string(),
            version: version.to_string(),
            block_type: BlockType::Official,
            package_type: PackageType::Registry,
        }
    }

    #[test]
    fn exact_versions_are_detected() {
        assert!(block_ref("1.2.0").is_exact_version());
        assert!(block_ref("0.3.11-beta.1").is_exact_version());
        assert!(!block_ref("^1.0.0").is_exact_version());
        assert!(!block_ref("~1.2").is_exact_version());
        assert!(!block_ref("1.x").is_exact_version());
    }

    #[test]
    fn archive_package_encodes_content_as_base64() {
        let package = BlockPackage::Archive {
            name: "custom".to_string(),
            version: "0.1.0".to_string(),
            block_type: BlockType::Custom,
            archive: b"tgz".to_vec(),
        };

        let value = serde_json::to_value(&package).unwrap();
        assert_eq!(
            value,
            json!({
                "packageType": "ARCHIVE",
                "name": "custom",
                "version": "0.1.0",
                "blockType": "CUSTOM",
                "archive": "dGd6"
            })
        );
        let decoded: BlockPackage = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, package);
    }
}
