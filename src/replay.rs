//! CSV replay surface: drives the engine from recorded operation rows.
//!
//! Each row is one operation. Rows are applied in file order; malformed
//! rows and refused operations are logged and skipped so a replay always
//! runs to completion. The `ref` column doubles as the idempotency key of
//! its row and, for escrow rows, as the label under which the created
//! escrow is addressed later in the file.

use crate::account::AccountId;
use crate::amount::Amount;
use crate::engine::PaymentEngine;
use crate::error::ReplayError;
use crate::escrow::EscrowId;
use crate::policy::Policy;
use csv::{ReaderBuilder, Trim};
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::str::FromStr;

/// Raw replay record as read from CSV.
///
/// All fields beyond `op` are optional at the CSV level; which ones a row
/// actually needs depends on its operation.
#[derive(Debug, Deserialize)]
pub struct ReplayRecord {
    /// Operation name: register, fund, withdraw, pay, escrow_create,
    /// escrow_release, escrow_cancel, pause, resume, allow, limit.
    pub op: String,

    /// Acting account (the payer for transfers).
    pub account: Option<String>,

    /// Counterparty account (the payee for transfers and escrows).
    pub counterparty: Option<String>,

    /// Amount in minor units, where the operation moves value.
    pub amount: Option<String>,

    /// Idempotency key, and escrow label for escrow rows.
    #[serde(rename = "ref")]
    pub reference: Option<String>,
}

impl ReplayRecord {
    /// Parses the raw CSV record into a typed command.
    ///
    /// Returns `None` if the record is invalid (unknown op, missing or
    /// unparseable required fields).
    pub fn parse(&self) -> Option<Command> {
        let op = self.op.trim().to_lowercase();

        match op.as_str() {
            "register" => Some(Command::Register {
                account: self.parse_account()?,
            }),
            "fund" => Some(Command::Fund {
                account: self.parse_account()?,
                amount: self.parse_amount()?,
                key: self.parse_reference(),
            }),
            "withdraw" => Some(Command::Withdraw {
                account: self.parse_account()?,
                amount: self.parse_amount()?,
                key: self.parse_reference(),
            }),
            "pay" => Some(Command::Pay {
                from: self.parse_account()?,
                to: self.parse_counterparty()?,
                amount: self.parse_amount()?,
                key: self.parse_reference(),
            }),
            "escrow_create" => Some(Command::EscrowCreate {
                from: self.parse_account()?,
                to: self.parse_counterparty()?,
                amount: self.parse_amount()?,
                label: self.parse_reference(),
            }),
            "escrow_release" => Some(Command::EscrowRelease {
                label: self.parse_reference()?,
            }),
            "escrow_cancel" => Some(Command::EscrowCancel {
                label: self.parse_reference()?,
            }),
            "pause" => Some(Command::Pause {
                account: self.parse_account()?,
            }),
            "resume" => Some(Command::Resume {
                account: self.parse_account()?,
            }),
            "allow" => Some(Command::Allow {
                account: self.parse_account()?,
                recipient: self.parse_counterparty()?,
            }),
            "limit" => Some(Command::Limit {
                account: self.parse_account()?,
                limit: self.parse_limit()?,
            }),
            _ => None,
        }
    }

    fn parse_account(&self) -> Option<AccountId> {
        parse_id(self.account.as_deref())
    }

    fn parse_counterparty(&self) -> Option<AccountId> {
        parse_id(self.counterparty.as_deref())
    }

    /// Parses the amount field into minor units.
    fn parse_amount(&self) -> Option<Amount> {
        let amount_str = self.amount.as_ref()?;
        let trimmed = amount_str.trim();
        if trimmed.is_empty() {
            return None;
        }
        Amount::from_str(trimmed).ok()
    }

    /// An absent amount clears the limit; a present one must parse.
    fn parse_limit(&self) -> Option<Option<Amount>> {
        match self.amount.as_deref().map(str::trim) {
            None | Some("") => Some(None),
            Some(_) => Some(Some(self.parse_amount()?)),
        }
    }

    fn parse_reference(&self) -> Option<String> {
        let reference = self.reference.as_deref()?.trim();
        if reference.is_empty() {
            None
        } else {
            Some(reference.to_string())
        }
    }
}

fn parse_id(field: Option<&str>) -> Option<AccountId> {
    let id = field?.trim();
    if id.is_empty() {
        None
    } else {
        Some(AccountId::new(id))
    }
}

/// A parsed and validated replay command ready to run.
#[derive(Debug, Clone)]
pub enum Command {
    /// Register an account with zero balances.
    Register { account: AccountId },

    /// Credit external value into an account.
    Fund {
        account: AccountId,
        amount: Amount,
        key: Option<String>,
    },

    /// Debit external value out of an account.
    Withdraw {
        account: AccountId,
        amount: Amount,
        key: Option<String>,
    },

    /// Transfer value between two accounts, subject to the payer's policy.
    Pay {
        from: AccountId,
        to: AccountId,
        amount: Amount,
        key: Option<String>,
    },

    /// Lock funds for a new escrow, addressable by its label.
    EscrowCreate {
        from: AccountId,
        to: AccountId,
        amount: Amount,
        label: Option<String>,
    },

    /// Settle the labelled escrow to its counterparty.
    EscrowRelease { label: String },

    /// Return the labelled escrow's funds to the payer.
    EscrowCancel { label: String },

    /// Pause the account's outgoing transfers.
    Pause { account: AccountId },

    /// Lift a pause.
    Resume { account: AccountId },

    /// Add a recipient to the account's allowlist.
    Allow {
        account: AccountId,
        recipient: AccountId,
    },

    /// Set the account's per-transaction limit; no amount clears it.
    Limit {
        account: AccountId,
        limit: Option<Amount>,
    },
}

/// Replays recorded operations against a fresh engine.
///
/// Owns the engine and the label-to-escrow mapping accumulated while
/// processing escrow_create rows.
pub struct Replay {
    engine: PaymentEngine,
    escrow_refs: HashMap<String, EscrowId>,
}

impl Replay {
    /// Creates a replay around an empty engine.
    pub fn new() -> Self {
        Replay {
            engine: PaymentEngine::new(),
            escrow_refs: HashMap::new(),
        }
    }

    /// The engine being driven, for inspection after a replay.
    pub fn engine(&self) -> &PaymentEngine {
        &self.engine
    }

    /// Processes replay rows from a CSV reader in streaming fashion.
    ///
    /// Records are read one at a time. Invalid records and refused
    /// operations are logged at warn level and skipped.
    pub fn process_csv<R: Read>(&mut self, reader: R) -> Result<(), ReplayError> {
        let mut csv_reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        for (row_idx, result) in csv_reader.deserialize::<ReplayRecord>().enumerate() {
            let row_num = row_idx + 2; // 1-indexed, accounting for header row

            match result {
                Ok(record) => {
                    if let Some(command) = record.parse() {
                        if let Err(e) = self.run(command, row_num) {
                            warn!("Row {}: {}", row_num, e);
                        }
                    } else {
                        warn!("Row {}: Failed to parse replay record", row_num);
                    }
                }
                Err(e) => {
                    warn!("Row {}: CSV parse error: {}", row_num, e);
                }
            }
        }

        Ok(())
    }

    /// Runs a single parsed command.
    fn run(&mut self, command: Command, row: usize) -> crate::error::Result<()> {
        match command {
            Command::Register { account } => {
                self.engine.register_account(account.clone())?;
                debug!("Row {}: Registered {}", row, account);
            }
            Command::Fund {
                account,
                amount,
                key,
            } => {
                self.engine.fund(account.clone(), amount, key.as_deref())?;
                debug!("Row {}: Funded {} with {}", row, account, amount);
            }
            Command::Withdraw {
                account,
                amount,
                key,
            } => {
                self.engine
                    .withdraw(account.clone(), amount, key.as_deref())?;
                debug!("Row {}: Withdrew {} from {}", row, amount, account);
            }
            Command::Pay {
                from,
                to,
                amount,
                key,
            } => {
                self.engine
                    .pay(from.clone(), to.clone(), amount, key.as_deref())?;
                debug!("Row {}: Paid {} from {} to {}", row, amount, from, to);
            }
            Command::EscrowCreate {
                from,
                to,
                amount,
                label,
            } => {
                let receipt =
                    self.engine
                        .create_escrow(from.clone(), to.clone(), amount, label.as_deref())?;
                if let (Some(label), Some(escrow_id)) = (label, receipt.escrow_id) {
                    self.escrow_refs.insert(label, escrow_id);
                }
                debug!("Row {}: Escrowed {} from {} for {}", row, amount, from, to);
            }
            Command::EscrowRelease { label } => {
                let escrow_id = match self.escrow_refs.get(&label) {
                    Some(escrow_id) => *escrow_id,
                    None => {
                        debug!(
                            "Row {}: Release references unknown escrow label {:?}, ignoring",
                            row, label
                        );
                        return Ok(());
                    }
                };
                self.engine.release_escrow(escrow_id, Some(&label))?;
                debug!("Row {}: Released escrow {:?}", row, label);
            }
            Command::EscrowCancel { label } => {
                let escrow_id = match self.escrow_refs.get(&label) {
                    Some(escrow_id) => *escrow_id,
                    None => {
                        debug!(
                            "Row {}: Cancel references unknown escrow label {:?}, ignoring",
                            row, label
                        );
                        return Ok(());
                    }
                };
                self.engine.cancel_escrow(escrow_id, Some(&label))?;
                debug!("Row {}: Cancelled escrow {:?}", row, label);
            }
            Command::Pause { account } => {
                self.update_policy(&account, row, |policy| policy.paused = true)?;
            }
            Command::Resume { account } => {
                self.update_policy(&account, row, |policy| policy.paused = false)?;
            }
            Command::Allow { account, recipient } => {
                self.update_policy(&account, row, |policy| {
                    policy.allowlist.insert(recipient);
                })?;
            }
            Command::Limit { account, limit } => {
                self.update_policy(&account, row, |policy| {
                    policy.max_per_transaction = limit;
                })?;
            }
        }

        Ok(())
    }

    /// Applies a policy edit to a registered account, skipping unknown ids.
    fn update_policy(
        &self,
        account: &AccountId,
        row: usize,
        edit: impl FnOnce(&mut Policy),
    ) -> crate::error::Result<()> {
        let mut policy = match self.engine.policy(account.clone())? {
            Some(policy) => policy,
            None => {
                debug!(
                    "Row {}: Policy change for unknown account {}, ignoring",
                    row, account
                );
                return Ok(());
            }
        };
        edit(&mut policy);
        self.engine.set_policy(account.clone(), policy)?;
        debug!("Row {}: Updated policy for {}", row, account);
        Ok(())
    }

    /// Writes final account states to CSV.
    ///
    /// Output is sorted by account id for deterministic results; header is
    /// `account,balance,hold,total_in,total_out`.
    pub fn write_report<W: Write>(&self, writer: W) -> Result<(), ReplayError> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        for account in self.engine.accounts()? {
            csv_writer.serialize(account)?;
        }

        csv_writer.flush()?;
        Ok(())
    }
}

impl Default for Replay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn replay_str(csv: &str) -> Replay {
        let mut replay = Replay::new();
        replay.process_csv(Cursor::new(csv)).unwrap();
        replay
    }

    fn balance(replay: &Replay, id: &str) -> i64 {
        replay
            .engine()
            .account(id)
            .unwrap()
            .unwrap()
            .balance
            .minor_units()
    }

    #[test]
    fn test_parse_pay() {
        let record = ReplayRecord {
            op: "pay".to_string(),
            account: Some("alice".to_string()),
            counterparty: Some("bob".to_string()),
            amount: Some("2500".to_string()),
            reference: Some("order-1".to_string()),
        };

        match record.parse().unwrap() {
            Command::Pay {
                from,
                to,
                amount,
                key,
            } => {
                assert_eq!(from.as_str(), "alice");
                assert_eq!(to.as_str(), "bob");
                assert_eq!(amount, Amount::new(2500));
                assert_eq!(key.as_deref(), Some("order-1"));
            }
            other => panic!("Expected Pay, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_op() {
        let record = ReplayRecord {
            op: "teleport".to_string(),
            account: Some("alice".to_string()),
            counterparty: None,
            amount: Some("100".to_string()),
            reference: None,
        };

        assert!(record.parse().is_none());
    }

    #[test]
    fn test_parse_rejects_missing_amount_for_pay() {
        let record = ReplayRecord {
            op: "pay".to_string(),
            account: Some("alice".to_string()),
            counterparty: Some("bob".to_string()),
            amount: None,
            reference: None,
        };

        assert!(record.parse().is_none());
    }

    #[test]
    fn test_parse_handles_whitespace_and_case() {
        let record = ReplayRecord {
            op: "  FUND  ".to_string(),
            account: Some(" alice ".to_string()),
            counterparty: None,
            amount: Some(" 100 ".to_string()),
            reference: None,
        };

        match record.parse().unwrap() {
            Command::Fund {
                account, amount, ..
            } => {
                assert_eq!(account.as_str(), "alice");
                assert_eq!(amount, Amount::new(100));
            }
            other => panic!("Expected Fund, got {:?}", other),
        }
    }

    #[test]
    fn test_register_fund_pay() {
        let csv = r#"op,account,counterparty,amount,ref
register,alice,,,
register,bob,,,
fund,alice,,10000,
pay,alice,bob,2500,"#;

        let replay = replay_str(csv);
        assert_eq!(balance(&replay, "alice"), 7500);
        assert_eq!(balance(&replay, "bob"), 2500);
    }

    #[test]
    fn test_withdraw_row() {
        let csv = r#"op,account,counterparty,amount,ref
register,alice,,,
fund,alice,,1000,
withdraw,alice,,400,"#;

        let replay = replay_str(csv);
        assert_eq!(balance(&replay, "alice"), 600);
    }

    #[test]
    fn test_duplicate_ref_applies_once() {
        let csv = r#"op,account,counterparty,amount,ref
register,alice,,,
register,bob,,,
fund,alice,,10000,
pay,alice,bob,2500,order-7
pay,alice,bob,2500,order-7"#;

        let replay = replay_str(csv);
        assert_eq!(balance(&replay, "alice"), 7500);
        assert_eq!(balance(&replay, "bob"), 2500);
    }

    #[test]
    fn test_pause_and_resume_rows() {
        let csv = r#"op,account,counterparty,amount,ref
register,alice,,,
register,bob,,,
fund,alice,,1000,
pause,alice,,,
pay,alice,bob,100,
resume,alice,,,
pay,alice,bob,100,"#;

        let replay = replay_str(csv);
        assert_eq!(balance(&replay, "alice"), 900);
        assert_eq!(balance(&replay, "bob"), 100);
    }

    #[test]
    fn test_allow_and_limit_rows() {
        let csv = r#"op,account,counterparty,amount,ref
register,alice,,,
register,bob,,,
register,carol,,,
fund,alice,,10000,
allow,alice,bob,,
limit,alice,,500,
pay,alice,carol,100,
pay,alice,bob,600,
pay,alice,bob,500,"#;

        let replay = replay_str(csv);
        // carol is not allowlisted, 600 exceeds the limit; only the 500 lands.
        assert_eq!(balance(&replay, "alice"), 9500);
        assert_eq!(balance(&replay, "bob"), 500);
        assert_eq!(balance(&replay, "carol"), 0);
    }

    #[test]
    fn test_limit_row_without_amount_clears_it() {
        let csv = r#"op,account,counterparty,amount,ref
register,alice,,,
register,bob,,,
fund,alice,,10000,
limit,alice,,500,
limit,alice,,,
pay,alice,bob,9000,"#;

        let replay = replay_str(csv);
        assert_eq!(balance(&replay, "bob"), 9000);
    }

    #[test]
    fn test_escrow_rows_release() {
        let csv = r#"op,account,counterparty,amount,ref
register,alice,,,
register,bob,,,
fund,alice,,10000,
escrow_create,alice,bob,3000,deal-1
escrow_release,,,,deal-1"#;

        let replay = replay_str(csv);
        assert_eq!(balance(&replay, "alice"), 7000);
        assert_eq!(balance(&replay, "bob"), 3000);

        let alice = replay.engine().account("alice").unwrap().unwrap();
        assert_eq!(alice.hold.minor_units(), 0);
    }

    #[test]
    fn test_escrow_rows_cancel() {
        let csv = r#"op,account,counterparty,amount,ref
register,alice,,,
register,bob,,,
fund,alice,,10000,
escrow_create,alice,bob,3000,deal-1
escrow_cancel,,,,deal-1"#;

        let replay = replay_str(csv);
        assert_eq!(balance(&replay, "alice"), 10000);
        assert_eq!(balance(&replay, "bob"), 0);
    }

    #[test]
    fn test_release_of_unknown_label_is_ignored() {
        let csv = r#"op,account,counterparty,amount,ref
register,alice,,,
fund,alice,,1000,
escrow_release,,,,no-such-deal"#;

        let replay = replay_str(csv);
        assert_eq!(balance(&replay, "alice"), 1000);
    }

    #[test]
    fn test_malformed_and_refused_rows_do_not_stop_the_replay() {
        let csv = r#"op,account,counterparty,amount,ref
register,alice,,,
register,bob,,,
fund,alice,,not-a-number,
teleport,alice,bob,100,
pay,alice,bob,100,
fund,alice,,1000,
pay,alice,bob,100,"#;

        let replay = replay_str(csv);
        // The bad fund, the unknown op, and the insolvent pay are skipped.
        assert_eq!(balance(&replay, "alice"), 900);
        assert_eq!(balance(&replay, "bob"), 100);
    }

    #[test]
    fn test_report_format() {
        let csv = r#"op,account,counterparty,amount,ref
register,bravo,,,
register,alpha,,,
fund,alpha,,1000,
fund,bravo,,500,
pay,alpha,bravo,250,"#;

        let replay = replay_str(csv);
        let mut output = Vec::new();
        replay.write_report(&mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        let mut lines = output_str.lines();
        assert_eq!(
            lines.next(),
            Some("account,balance,hold,total_in,total_out")
        );
        // Sorted by account id, balances and settled totals as expected.
        assert_eq!(lines.next(), Some("alpha,750,0,1000,250"));
        assert_eq!(lines.next(), Some("bravo,750,0,750,0"));
        assert_eq!(lines.next(), None);
    }
}
