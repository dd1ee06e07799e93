//! In-memory terminal registry.
//!
//! Loaded once at startup from a `phone;authcode` text file; entries are
//! never added at runtime. Each record tracks the live connection link, the
//! manufacturer id reported at registration and a pending-upgrade slot.

use crate::connection::TerminalMessage;
use crate::error::ServerError;
use jt808_protocol::PhoneNumber;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Handle into a steady-state terminal connection task.
pub type TerminalLink = mpsc::Sender<TerminalMessage>;

/// A firmware upgrade queued for a terminal.
#[derive(Debug, Clone)]
pub struct PendingUpgrade {
    pub upgrade_type: u8,
    pub version: String,
    pub file_path: PathBuf,
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterVerdict {
    /// The database holds no terminals at all.
    NoSuchVehicle,
    /// The phone number is not in the database.
    NoSuchTerminal,
    /// The record already has a live connection.
    AlreadyRegistered,
    /// Registration may proceed with this authentication code.
    Accepted { auth_code: [u8; 4] },
}

/// Result of resolving an operator-supplied phone number.
pub enum TerminalLookup {
    Unknown,
    Offline,
    Online(TerminalLink),
}

#[derive(Debug)]
struct TerminalEntry {
    digits: String,
    phone: PhoneNumber,
    auth_code: [u8; 4],
    manufacturer_id: Option<[u8; 5]>,
    link: Option<TerminalLink>,
    pending_upgrade: Option<PendingUpgrade>,
}

/// The set of known terminals, keyed by phone number.
#[derive(Debug, Default)]
pub struct TerminalRegistry {
    entries: Mutex<Vec<TerminalEntry>>,
}

impl TerminalRegistry {
    /// Loads the registry from a `phone;authcode` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses registry records from file content. Blank lines are ignored;
    /// the authcode is a decimal u32 whose little-endian byte image is the
    /// 4-byte code used on the wire.
    pub fn parse(content: &str) -> Result<Self, ServerError> {
        let mut entries = Vec::new();
        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let load_err = |reason: &str| ServerError::RegistryLoad {
                line: index + 1,
                reason: reason.to_string(),
            };
            let (digits, code) = line
                .split_once(';')
                .ok_or_else(|| load_err("expected phone;authcode"))?;
            let digits = digits.trim();
            let phone = PhoneNumber::from_digits(digits)
                .map_err(|_| load_err("invalid phone number"))?;
            let code: u32 = code
                .trim()
                .parse()
                .map_err(|_| load_err("invalid authentication code"))?;
            entries.push(TerminalEntry {
                digits: digits.to_string(),
                phone,
                auth_code: code.to_le_bytes(),
                manufacturer_id: None,
                link: None,
                pending_upgrade: None,
            });
        }
        Ok(Self {
            entries: Mutex::new(entries),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records with a live connection.
    pub fn connected_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.link.is_some())
            .count()
    }

    /// Applies the registration rules for a terminal announcing `phone`.
    pub fn register_verdict(&self, phone: &PhoneNumber) -> RegisterVerdict {
        let entries = self.entries.lock().unwrap();
        if entries.is_empty() {
            return RegisterVerdict::NoSuchVehicle;
        }
        match entries.iter().find(|e| e.phone == *phone) {
            None => RegisterVerdict::NoSuchTerminal,
            Some(entry) if entry.link.is_some() => RegisterVerdict::AlreadyRegistered,
            Some(entry) => RegisterVerdict::Accepted {
                auth_code: entry.auth_code,
            },
        }
    }

    /// Compares a supplied authentication code against the record.
    pub fn authenticate(&self, phone: &PhoneNumber, code: &[u8]) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.phone == *phone)
            .is_some_and(|e| e.auth_code == code)
    }

    /// Binds a live connection to the record, storing the manufacturer id
    /// reported during registration.
    pub fn attach(
        &self,
        phone: &PhoneNumber,
        manufacturer_id: [u8; 5],
        link: TerminalLink,
    ) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.phone == *phone) {
            Some(entry) if entry.link.is_none() => {
                entry.manufacturer_id = Some(manufacturer_id);
                entry.link = Some(link);
                true
            }
            _ => false,
        }
    }

    /// Clears the record's connection link.
    pub fn detach(&self, phone: &PhoneNumber) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.phone == *phone) {
            entry.link = None;
        }
    }

    /// Resolves an operator-supplied phone number exactly as written in the
    /// database file.
    pub fn lookup_digits(&self, digits: &str) -> TerminalLookup {
        let entries = self.entries.lock().unwrap();
        match entries.iter().find(|e| e.digits == digits) {
            None => TerminalLookup::Unknown,
            Some(entry) => match &entry.link {
                Some(link) => TerminalLookup::Online(link.clone()),
                None => TerminalLookup::Offline,
            },
        }
    }

    pub fn manufacturer_id(&self, phone: &PhoneNumber) -> Option<[u8; 5]> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.phone == *phone)
            .and_then(|e| e.manufacturer_id)
    }

    /// Queues a firmware upgrade on the record.
    pub fn set_pending_upgrade(&self, digits: &str, job: PendingUpgrade) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.digits == digits) {
            Some(entry) => {
                entry.pending_upgrade = Some(job);
                true
            }
            None => false,
        }
    }

    /// Claims the queued upgrade, leaving the slot empty.
    pub fn take_pending_upgrade(&self, phone: &PhoneNumber) -> Option<PendingUpgrade> {
        self.entries
            .lock()
            .unwrap()
            .iter_mut()
            .find(|e| e.phone == *phone)
            .and_then(|e| e.pending_upgrade.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone(digits: &str) -> PhoneNumber {
        PhoneNumber::from_digits(digits).unwrap()
    }

    fn link() -> TerminalLink {
        mpsc::channel(1).0
    }

    #[test]
    fn test_parse_database() {
        let registry =
            TerminalRegistry::parse("012345678901;12345\n\n013900001111;305419896\n").unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(matches!(
            TerminalRegistry::parse("0123456789"),
            Err(ServerError::RegistryLoad { line: 1, .. })
        ));
        assert!(TerminalRegistry::parse("012345678901;notanumber").is_err());
        assert!(TerminalRegistry::parse("01234x678901;5").is_err());
    }

    #[test]
    fn test_auth_code_is_little_endian_image() {
        let registry = TerminalRegistry::parse("012345678901;12345").unwrap();
        // 12345 = 0x3039
        assert!(registry.authenticate(&phone("012345678901"), &[0x39, 0x30, 0x00, 0x00]));
        assert!(!registry.authenticate(&phone("012345678901"), &[0x00, 0x30, 0x39, 0x00]));
    }

    #[test]
    fn test_register_verdicts() {
        let empty = TerminalRegistry::parse("").unwrap();
        assert_eq!(
            empty.register_verdict(&phone("012345678901")),
            RegisterVerdict::NoSuchVehicle
        );

        let registry = TerminalRegistry::parse("012345678901;12345").unwrap();
        assert_eq!(
            registry.register_verdict(&phone("019999999999")),
            RegisterVerdict::NoSuchTerminal
        );
        assert_eq!(
            registry.register_verdict(&phone("012345678901")),
            RegisterVerdict::Accepted {
                auth_code: 12345u32.to_le_bytes()
            }
        );

        assert!(registry.attach(&phone("012345678901"), *b"VMFGA", link()));
        assert_eq!(
            registry.register_verdict(&phone("012345678901")),
            RegisterVerdict::AlreadyRegistered
        );
    }

    #[test]
    fn test_attach_detach_cycle() {
        let registry = TerminalRegistry::parse("012345678901;1").unwrap();
        let target = phone("012345678901");

        assert!(registry.attach(&target, *b"VMFGA", link()));
        assert!(!registry.attach(&target, *b"VMFGA", link()));
        assert_eq!(registry.connected_count(), 1);
        assert_eq!(registry.manufacturer_id(&target), Some(*b"VMFGA"));

        registry.detach(&target);
        assert_eq!(registry.connected_count(), 0);
        assert!(registry.attach(&target, *b"VMFGB", link()));
    }

    #[test]
    fn test_lookup_by_digits_is_exact() {
        let registry = TerminalRegistry::parse("012345678901;1").unwrap();
        assert!(matches!(
            registry.lookup_digits("999"),
            TerminalLookup::Unknown
        ));
        assert!(matches!(
            registry.lookup_digits("012345678901"),
            TerminalLookup::Offline
        ));
        // the 12-digit expansion only matches when written that way in the file
        assert!(matches!(
            registry.lookup_digits("12345678901"),
            TerminalLookup::Unknown
        ));

        registry.attach(&phone("012345678901"), *b"VMFGA", link());
        assert!(matches!(
            registry.lookup_digits("012345678901"),
            TerminalLookup::Online(_)
        ));
    }

    #[test]
    fn test_pending_upgrade_slot() {
        let registry = TerminalRegistry::parse("012345678901;1").unwrap();
        let target = phone("012345678901");
        assert!(registry.set_pending_upgrade(
            "012345678901",
            PendingUpgrade {
                upgrade_type: 0x34,
                version: "V1.0".to_string(),
                file_path: PathBuf::from("/tmp/firmware.bin"),
            }
        ));
        let job = registry.take_pending_upgrade(&target).unwrap();
        assert_eq!(job.version, "V1.0");
        assert!(registry.take_pending_upgrade(&target).is_none());
    }
}
