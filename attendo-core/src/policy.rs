use crate::config::WindowsConfig;
use crate::identity::Identity;
use crate::ledger::{
    AppendOutcome, AttendanceRecord, AttendanceStatus, EntryType, Ledger, LedgerError,
};
use crate::table::TableWarning;
use chrono::{NaiveDateTime, NaiveTime};
use std::fmt;

/// Status and type assigned to a sighting at a given time of day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub status: AttendanceStatus,
    pub entry_type: EntryType,
}

/// Maps wall-clock time onto the check-in / check-out windows
#[derive(Debug, Clone)]
pub struct AttendancePolicy {
    windows: WindowsConfig,
}

impl AttendancePolicy {
    pub fn new(windows: WindowsConfig) -> Self {
        Self { windows }
    }

    pub fn decide(&self, time: NaiveTime) -> Decision {
        if self.windows.check_in.contains(time) {
            Decision {
                status: AttendanceStatus::Present,
                entry_type: EntryType::CheckIn,
            }
        } else if self.windows.check_out.contains(time) {
            Decision {
                status: AttendanceStatus::Present,
                entry_type: EntryType::CheckOut,
            }
        } else {
            Decision {
                status: AttendanceStatus::Unmarked,
                entry_type: EntryType::OutOfWindow,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    Logged {
        display_name: String,
        entry_type: EntryType,
    },
    AlreadyLogged {
        display_name: String,
        entry_type: EntryType,
    },
}

impl LogOutcome {
    pub fn is_logged(&self) -> bool {
        matches!(self, LogOutcome::Logged { .. })
    }
}

impl fmt::Display for LogOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogOutcome::Logged {
                display_name,
                entry_type,
            } => write!(f, "{} - Status: {}", display_name, entry_type),
            LogOutcome::AlreadyLogged {
                display_name,
                entry_type,
            } => write!(f, "{} already logged for {} today.", display_name, entry_type),
        }
    }
}

#[derive(Debug)]
pub struct LogResult {
    pub outcome: LogOutcome,
    /// The candidate row, whether or not it was written
    pub record: AttendanceRecord,
    pub warnings: Vec<TableWarning>,
}

/// Decides check-in / check-out for a recognized student and writes at most
/// one ledger row per (ticket, date, type)
pub struct AttendanceLogger<L: Ledger> {
    policy: AttendancePolicy,
    ledger: L,
}

impl<L: Ledger> AttendanceLogger<L> {
    pub fn new(policy: AttendancePolicy, ledger: L) -> Self {
        Self { policy, ledger }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn log(&mut self, identifier: &str, now: NaiveDateTime) -> Result<LogResult, LedgerError> {
        let identity = Identity::decode(identifier);
        let decision = self.policy.decide(now.time());

        let record = AttendanceRecord {
            ticket_id: identity.ticket_id,
            display_name: identity.display_name,
            department: identity.department,
            section: identity.section,
            date: now.format("%Y-%m-%d").to_string(),
            weekday: now.format("%A").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            status: decision.status,
            entry_type: decision.entry_type,
        };

        // "---" rows only collide with other "---" rows for the same day
        let key = record.dedupe_key();
        let report = self.ledger.append_if_absent(record.clone(), &key)?;

        let display_name = record.display_name.clone();
        let entry_type = record.entry_type.clone();
        let outcome = match report.outcome {
            AppendOutcome::Appended => {
                log::info!("{} marked as {}", display_name, entry_type);
                LogOutcome::Logged {
                    display_name,
                    entry_type,
                }
            }
            AppendOutcome::Duplicate => LogOutcome::AlreadyLogged {
                display_name,
                entry_type,
            },
        };

        Ok(LogResult {
            outcome,
            record,
            warnings: report.warnings,
        })
    }
}
