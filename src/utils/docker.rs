//! Container image references

use std::fmt;

pub const STASH_IMAGE: &str = "stash";

/// Image reference `<registry>/<image>:<tag>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Docker {
    pub registry: String,
    pub image: String,
    pub tag: String,
}

impl Docker {
    /// The sidecar image, which also runs the check job
    pub fn stash(registry: &str, tag: &str) -> Self {
        Self {
            registry: registry.trim_end_matches('/').to_string(),
            image: STASH_IMAGE.to_string(),
            tag: tag.to_string(),
        }
    }

    pub fn to_container_image(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Docker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.registry.is_empty() {
            write!(f, "{}:{}", self.image, self.tag)
        } else {
            write!(f, "{}/{}:{}", self.registry, self.image, self.tag)
        }
    }
}
