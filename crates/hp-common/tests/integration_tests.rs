// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Integration tests for hp-common
//!
//! Error taxonomy, layout validation and logging.

#![cfg(test)]

mod error_tests {
    use hp_common::{Error, ErrorKind};
    use std::collections::HashSet;

    const ALL: &[Error] = &[
        Error::InvalidDataPointer,
        Error::InvalidSize,
        Error::InvalidCodeSize,
        Error::CodeSizeMismatch,
        Error::InvalidType,
        Error::InvalidTargetAddress,
        Error::DuplicateTarget,
        Error::DataSizeMismatch,
        Error::NoFreeSlots,
        Error::NoFreeCode,
        Error::ApplicationPending,
        Error::SlotNotFound,
        Error::InvalidSlotState,
        Error::InvalidSlotIndex,
        Error::InvalidCodePointer,
        Error::NoPendingHotpatch,
        Error::InvalidIdentifier,
        Error::ApplyFailed,
        Error::InvalidConfiguration,
        Error::RegionProgrammingFailed,
        Error::MemoryAccessFailed,
    ];

    #[test]
    fn test_error_codes_unique() {
        let codes: HashSet<u16> = ALL.iter().map(Error::code).collect();
        assert_eq!(codes.len(), ALL.len());
    }

    #[test]
    fn test_malformed_errors_are_not_retryable() {
        for error in ALL.iter().filter(|e| e.kind() == ErrorKind::Malformed) {
            assert!(!error.is_retryable(), "{error}");
        }
    }

    #[test]
    fn test_error_display() {
        let text = std::format!("{}", Error::NoFreeSlots);
        assert_eq!(text, "[0x0201] no free slots");
    }
}

mod config_tests {
    use hp_common::{AddressRange, Error, ManagerConfig, MemoryLayout};

    #[test]
    fn test_default_config_uses_reference_layout() {
        let config = ManagerConfig::default();
        assert_eq!(config.layout, MemoryLayout::NRF52840);
        assert!(config.poll_interval_ms > 0);
    }

    #[test]
    fn test_empty_region_rejected() {
        let mut layout = MemoryLayout::NRF52840;
        layout.context = AddressRange::new(0x2000_C000, 0x2000_C000);
        assert_eq!(layout.validate(), Err(Error::InvalidConfiguration));
    }

    #[test]
    fn test_guarded_regions_cover_quarantine() {
        let layout = MemoryLayout::NRF52840;
        assert!(layout.guarded_regions().iter().any(|r| r.encloses(&layout.quarantine)));
        assert!(layout.guarded_regions().contains(&layout.firmware));
    }
}

mod log_tests {
    use hp_common::{log_warn, Component, LogBuffer};

    #[test]
    fn test_long_messages_truncate() {
        let mut log = LogBuffer::new();
        let long = "x".repeat(400);
        log_warn!(log, 0, Component::Manager, "{}", long);
        let entry = log.last().expect("entry recorded");
        assert_eq!(entry.message.len(), hp_common::log::MAX_LOG_MESSAGE_LEN);
    }

    #[test]
    fn test_entry_display_format() {
        let mut log = LogBuffer::new();
        log_warn!(log, 0x2A, Component::Guard, "denied");
        let text = std::format!("{}", log.last().expect("entry recorded"));
        assert_eq!(text, "[0000002A] W [guard] denied");
    }
}
