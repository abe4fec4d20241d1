//! All Paths are recorded here for use throughout this codebase
pub mod base {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
}

pub mod rate_limits {
    pub const TRACK: &str = "/rl/{subject}";
    pub const QUERY: &str = "/rl-check/{subject}";
}

pub mod datastore {
    pub const OBJECT: &str = "/powerapi/dist-datastore/objects/{key}";
}

pub fn track_path(subject: &str) -> String {
    rate_limits::TRACK.replace("{subject}", subject)
}

pub fn query_path(subject: &str) -> String {
    rate_limits::QUERY.replace("{subject}", subject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OBJECT_PATH_PREFIX;

    #[test]
    fn object_route_matches_wire_prefix() {
        assert!(datastore::OBJECT.starts_with(OBJECT_PATH_PREFIX));
        assert_eq!(track_path("usertest1"), "/rl/usertest1");
        assert_eq!(query_path("usertest1"), "/rl-check/usertest1");
    }
}
