//! Reads the CSV transaction workload a client injects into the
//! system.

use std::path::Path;

use crate::bft::error::*;

/// A single transfer between two named accounts, as read from the
/// input CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub sender: String,
    pub receiver: String,
    pub amount: i64,
}

impl Transaction {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, amount: i64) -> Self {
        Transaction {
            sender: sender.into(),
            receiver: receiver.into(),
            amount,
        }
    }
}

/// Reads at most `max_tx_num` transactions from `path`, skipping the
/// header row and any record with fewer than three fields or an
/// unparseable amount.
pub fn read_transactions(path: impl AsRef<Path>, max_tx_num: i64) -> Result<Vec<Transaction>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .simple(ErrorKind::Dataset)?;

    let mut txs = Vec::new();

    for result in reader.records() {
        if txs.len() as i64 >= max_tx_num {
            break;
        }

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                log::warn!("skipping malformed csv record: {}", e);
                continue;
            }
        };

        if record.len() < 3 {
            continue;
        }

        let sender = record.get(0).unwrap();
        let receiver = record.get(1).unwrap();
        let amount = match record.get(2).unwrap().parse::<i64>() {
            Ok(amount) => amount,
            Err(_) => {
                log::warn!("skipping record with unparseable amount: {:?}", record);
                continue;
            }
        };

        txs.push(Transaction::new(sender, receiver, amount));
    }

    Ok(txs)
}
