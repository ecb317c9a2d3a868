//! Bulk binding of direct codes from an `address,code` file.

use crate::error::{ServiceError, ServiceResult};
use invite_core::{
    BindingEngine, CodeStore, CodeType, IdentityKey, InviteError, InviteStorage, Owner,
};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub line: usize,
    pub address: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Bound,
    CodeTaken,
    AddressTaken(String),
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub bound: usize,
    pub skipped: Vec<(ImportRecord, ImportOutcome)>,
}

/// Parse `address,code` lines. Blank lines are ignored.
pub fn parse_records(text: &str) -> ServiceResult<Vec<ImportRecord>> {
    let mut records = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
        match fields.as_slice() {
            [address, code] if !address.is_empty() && !code.is_empty() => {
                records.push(ImportRecord {
                    line,
                    address: address.to_ascii_lowercase(),
                    code: code.to_string(),
                });
            }
            _ => {
                return Err(ServiceError::Import(format!(
                    "line {line}: expected `address,code`, got `{raw}`"
                )))
            }
        }
    }
    Ok(records)
}

/// Ask until the operator answers `y` or `n`.
pub fn confirm<R: BufRead, W: Write>(mut input: R, mut output: W) -> std::io::Result<bool> {
    loop {
        writeln!(output, "Continue with the import? (y/n)")?;
        output.flush()?;

        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            return Ok(false);
        }
        match answer.trim() {
            "y" => return Ok(true),
            "n" => return Ok(false),
            _ => writeln!(output, "press `y` or `n`")?,
        }
    }
}

pub struct BulkBinder {
    store: Arc<dyn InviteStorage>,
    engine: BindingEngine,
}

impl BulkBinder {
    pub fn new(store: Arc<dyn InviteStorage>) -> Self {
        Self {
            engine: BindingEngine::new(store.clone()),
            store,
        }
    }

    /// Bind every record in order.
    ///
    /// An unknown code or a code that is not a direct code stops the import;
    /// rows already applied stay bound. Taken codes and addresses are skipped.
    pub async fn apply(&self, records: &[ImportRecord]) -> ServiceResult<ImportReport> {
        let mut report = ImportReport::default();

        for record in records {
            let outcome = self.apply_one(record).await?;
            match &outcome {
                ImportOutcome::Bound => {
                    report.bound += 1;
                    info!(address = %record.address, code = %record.code, "bound");
                }
                ImportOutcome::CodeTaken => {
                    info!(code = %record.code, line = record.line, "code already bound, skipping");
                    report.skipped.push((record.clone(), outcome));
                }
                ImportOutcome::AddressTaken(existing) => {
                    info!(
                        address = %record.address,
                        existing = %existing,
                        line = record.line,
                        "address already bound, skipping"
                    );
                    report.skipped.push((record.clone(), outcome));
                }
            }
        }

        Ok(report)
    }

    async fn apply_one(&self, record: &ImportRecord) -> ServiceResult<ImportOutcome> {
        let Some(code) = self.store.find_by_code(&record.code).await? else {
            return Err(ServiceError::Import(format!(
                "line {}: code {} does not exist",
                record.line, record.code
            )));
        };
        if code.is_bound() {
            return Ok(ImportOutcome::CodeTaken);
        }
        if code.code_type != CodeType::Direct {
            return Err(ServiceError::Import(format!(
                "line {}: code {} is {}, expected direct",
                record.line, record.code, code.code_type
            )));
        }
        if let Some(existing) = self
            .store
            .find_by_owner(&IdentityKey::wallet(&record.address))
            .await?
        {
            return Ok(ImportOutcome::AddressTaken(existing.code));
        }

        match self
            .engine
            .claim_direct(&record.code, Owner::wallet(&record.address))
            .await
        {
            Ok(_) => Ok(ImportOutcome::Bound),
            Err(InviteError::AlreadyBound(_)) => Ok(ImportOutcome::CodeTaken),
            Err(InviteError::OwnerAlreadyBound(key)) => Ok(ImportOutcome::AddressTaken(key)),
            Err(other) => Err(other.into()),
        }
    }
}
