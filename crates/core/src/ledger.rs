//! Evidence ledger.
//!
//! Ordered record of every finding produced during one evaluation. Insertion order is call
//! order, which is what the audit trail replays. Once the decision rule has run the ledger is
//! sealed and further appends are rejected.

use crate::error::{GuardianError, GuardianResult};
use crate::finding::{Finding, Severity};
use crate::tools::ToolName;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    /// Position in the ledger, starting at zero.
    pub index: usize,
    pub tool: ToolName,
    pub finding: Finding,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceLedger {
    entries: Vec<LedgerEntry>,
    sealed: bool,
}

impl EvidenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends findings produced by `tool`, preserving their order.
    ///
    /// # Errors
    ///
    /// Returns `GuardianError::LedgerSealed` once the ledger has been sealed.
    pub fn append(
        &mut self,
        tool: ToolName,
        findings: impl IntoIterator<Item = Finding>,
    ) -> GuardianResult<()> {
        if self.sealed {
            return Err(GuardianError::LedgerSealed);
        }
        for finding in findings {
            let index = self.entries.len();
            self.entries.push(LedgerEntry {
                index,
                tool,
                finding,
            });
        }
        Ok(())
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.entries.iter().map(|e| &e.finding)
    }

    /// Owned copy of every finding, for audit records and decisions.
    pub fn snapshot(&self) -> Vec<Finding> {
        self.findings().cloned().collect()
    }

    pub fn with_severity(&self, severity: Severity) -> Vec<Finding> {
        self.findings()
            .filter(|f| f.severity() == severity)
            .cloned()
            .collect()
    }

    pub fn has_critical(&self) -> bool {
        self.findings().any(|f| f.severity() == Severity::Critical)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
