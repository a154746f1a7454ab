//! Typed ID definitions for all control-plane records.
//!
//! Each ID type has a unique prefix that identifies the record type.
//! IDs are ULID-based for sortability and uniqueness, which gives
//! per-application operation histories a natural time order.

use crate::define_id;

// =============================================================================
// Applications
// =============================================================================

define_id!(AppId, "app");

// =============================================================================
// Reconciliation
// =============================================================================

define_id!(SyncId, "sync");

// =============================================================================
// Progressive Delivery
// =============================================================================

define_id!(RolloutId, "ro");
define_id!(AnalysisRunId, "run");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_id_roundtrip() {
        let id = AppId::new();
        let s = id.to_string();
        let parsed: AppId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_app_id_prefix() {
        let id = AppId::new();
        let s = id.to_string();
        assert!(s.starts_with("app_"));
    }

    #[test]
    fn test_app_id_invalid_prefix() {
        let result: Result<AppId, _> = "sync_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn test_app_id_missing_separator() {
        let result: Result<AppId, _> = "app01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::MissingSeparator
        ));
    }

    #[test]
    fn test_app_id_empty() {
        let result: Result<AppId, _> = "".parse();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_app_id_invalid_ulid() {
        let result: Result<AppId, _> = "app_invalid".parse();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_sync_id_json_roundtrip() {
        let id = SyncId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: SyncId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_sync_id_sortable() {
        let id1 = SyncId::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = SyncId::new();
        // ULIDs are time-ordered, so id1 < id2
        assert!(id1 < id2);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        let prefixes = vec![
            AppId::PREFIX,
            SyncId::PREFIX,
            RolloutId::PREFIX,
            AnalysisRunId::PREFIX,
            RequestId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }
}
