use std::sync::Mutex;

use bitcoin::Txid;

use crate::error::Error;

use super::{
    NewOutput, NewTransaction, OutputPatch, OutputRecord, TransactionRecord, WalletStorage,
};

/// Reference in-memory wallet store. Rollback restores a snapshot taken at
/// `begin`; good enough for a single-writer engine and for tests.
#[derive(Default)]
pub struct MemoryWalletStore {
    inner: Mutex<Inner>,
    snapshot: Mutex<Option<Inner>>,
}

#[derive(Default, Clone)]
struct Inner {
    txs: Vec<TransactionRecord>,
    outputs: Vec<OutputRecord>,
    baskets: Vec<(i64, String)>,
    tags: Vec<(i64, String)>,
    labels: Vec<(i64, String)>,
    output_tags: Vec<(i64, i64)>,
    tx_labels: Vec<(i64, i64)>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("wallet store poisoned")
    }

    /// All stored outputs; test/introspection helper.
    pub fn outputs(&self) -> Vec<OutputRecord> {
        self.lock().outputs.clone()
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.lock().txs.clone()
    }

    /// Tag names attached to an output; test/introspection helper.
    pub fn output_tag_names(&self, output_id: i64) -> Vec<String> {
        let inner = self.lock();

        inner
            .output_tags
            .iter()
            .filter(|(out_id, _)| *out_id == output_id)
            .filter_map(|(_, tag_id)| {
                inner
                    .tags
                    .iter()
                    .find(|(id, _)| id == tag_id)
                    .map(|(_, name)| name.clone())
            })
            .collect()
    }

    pub fn basket_name(&self, basket_id: i64) -> Option<String> {
        self.lock()
            .baskets
            .iter()
            .find(|(id, _)| *id == basket_id)
            .map(|(_, name)| name.clone())
    }

    fn find_or_insert(list: &mut Vec<(i64, String)>, next_id: &mut i64, name: &str) -> i64 {
        if let Some((id, _)) = list.iter().find(|(_, n)| n == name) {
            return *id;
        }

        *next_id += 1;
        list.push((*next_id, name.to_string()));
        *next_id
    }
}

impl WalletStorage for MemoryWalletStore {
    fn find_transaction(&self, txid: &Txid) -> Result<Option<TransactionRecord>, Error> {
        Ok(self.lock().txs.iter().find(|t| t.txid == *txid).cloned())
    }

    fn insert_transaction(&self, tx: NewTransaction) -> Result<i64, Error> {
        let mut inner = self.lock();
        let id = inner.next_id();

        inner.txs.push(TransactionRecord {
            id,
            txid: tx.txid,
            status: tx.status,
            is_outgoing: tx.is_outgoing,
            satoshis: tx.satoshis,
            satoshis_spent: tx.satoshis_spent,
            satoshis_received: tx.satoshis_received,
            raw_tx: tx.raw_tx,
            reference: tx.reference,
        });

        Ok(id)
    }

    fn find_output(&self, txid: &Txid, vout: u32) -> Result<Option<OutputRecord>, Error> {
        Ok(self
            .lock()
            .outputs
            .iter()
            .find(|o| o.txid == *txid && o.vout == vout)
            .cloned())
    }

    fn insert_output(&self, output: NewOutput) -> Result<i64, Error> {
        let mut inner = self.lock();

        if inner
            .outputs
            .iter()
            .any(|o| o.txid == output.txid && o.vout == output.vout)
        {
            return Err(Error::storage(format!(
                "duplicate output {}:{}",
                output.txid, output.vout
            )));
        }

        let id = inner.next_id();

        inner.outputs.push(OutputRecord {
            id,
            transaction_id: output.transaction_id,
            txid: output.txid,
            vout: output.vout,
            satoshis: output.satoshis,
            locking_script: output.locking_script,
            basket_id: output.basket_id,
            spendable: output.spendable,
            spent_by: output.spent_by,
            change: output.change,
            purpose: output.purpose,
            output_type: output.output_type,
            provided_by: output.provided_by,
            custom_instructions: output.custom_instructions,
        });

        Ok(id)
    }

    fn update_output(&self, output_id: i64, patch: OutputPatch) -> Result<(), Error> {
        let mut inner = self.lock();

        let output = inner
            .outputs
            .iter_mut()
            .find(|o| o.id == output_id)
            .ok_or_else(|| Error::storage(format!("no output with id {output_id}")))?;

        if let Some(spendable) = patch.spendable {
            output.spendable = spendable;
        }
        if let Some(spent_by) = patch.spent_by {
            output.spent_by = spent_by;
        }

        Ok(())
    }

    fn find_or_insert_basket(&self, name: &str) -> Result<i64, Error> {
        let mut inner = self.lock();
        let Inner {
            baskets, next_id, ..
        } = &mut *inner;

        Ok(Self::find_or_insert(baskets, next_id, name))
    }

    fn find_or_insert_tag(&self, name: &str) -> Result<i64, Error> {
        let mut inner = self.lock();
        let Inner { tags, next_id, .. } = &mut *inner;

        Ok(Self::find_or_insert(tags, next_id, name))
    }

    fn tag_output(&self, output_id: i64, tag_id: i64) -> Result<(), Error> {
        let mut inner = self.lock();

        if !inner.output_tags.contains(&(output_id, tag_id)) {
            inner.output_tags.push((output_id, tag_id));
        }

        Ok(())
    }

    fn find_or_insert_label(&self, name: &str) -> Result<i64, Error> {
        let mut inner = self.lock();
        let Inner {
            labels, next_id, ..
        } = &mut *inner;

        Ok(Self::find_or_insert(labels, next_id, name))
    }

    fn label_transaction(&self, transaction_id: i64, label_id: i64) -> Result<(), Error> {
        let mut inner = self.lock();

        if !inner.tx_labels.contains(&(transaction_id, label_id)) {
            inner.tx_labels.push((transaction_id, label_id));
        }

        Ok(())
    }

    fn begin(&self) -> Result<(), Error> {
        let snapshot = self.lock().clone();
        *self.snapshot.lock().expect("snapshot poisoned") = Some(snapshot);
        Ok(())
    }

    fn commit(&self) -> Result<(), Error> {
        *self.snapshot.lock().expect("snapshot poisoned") = None;
        Ok(())
    }

    fn rollback(&self) -> Result<(), Error> {
        let snapshot = self
            .snapshot
            .lock()
            .expect("snapshot poisoned")
            .take()
            .ok_or_else(|| Error::storage("rollback without begin"))?;

        *self.lock() = snapshot;
        Ok(())
    }
}
