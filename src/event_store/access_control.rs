//! Optional authorization hook consulted before a replay.

/// Decides whether a replay request may proceed.
///
/// Only consulted when [`crate::config::EventStoreConfig::access_control_enabled`]
/// is set; by default every stream is replayable by anyone who knows its
/// last event id.
pub trait Authorizer: Send + Sync {
    /// Return `true` if `user_id` may replay `stream_id`.
    fn authorize(&self, stream_id: &str, user_id: Option<&str>) -> bool;
}

/// Allows every request. The default when no authorizer is configured.
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _stream_id: &str, _user_id: Option<&str>) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_always_authorizes() {
        let a = AllowAll;
        assert!(a.authorize("stream-1", None));
        assert!(a.authorize("stream-1", Some("user-1")));
    }
}
