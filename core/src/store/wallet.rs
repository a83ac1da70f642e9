use super::CardStore;
use crate::{
    error::EngineResult,
    model::{Card, WalletEntry},
    types::{CardId, UserId},
};
use rusqlite::params;

impl CardStore {
    // ── Wallet ────────────────────────────────────────────────────

    /// Add a card to a user's wallet, or update its flag if already held.
    pub fn upsert_wallet_entry(&self, entry: &WalletEntry) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO wallet_entry (user_id, card_id, active, notes)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, card_id)
             DO UPDATE SET active = excluded.active, notes = excluded.notes",
            params![
                entry.user_id,
                entry.card_id,
                if entry.active { 1 } else { 0 },
                &entry.notes
            ],
        )?;
        Ok(())
    }

    pub fn set_wallet_active(&self, user_id: UserId, card_id: CardId, active: bool) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE wallet_entry SET active = ?1 WHERE user_id = ?2 AND card_id = ?3",
            params![if active { 1 } else { 0 }, user_id, card_id],
        )?;
        Ok(())
    }

    pub fn wallet(&self, user_id: UserId) -> EngineResult<Vec<WalletEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, card_id, active, notes FROM wallet_entry
             WHERE user_id = ?1 ORDER BY card_id ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(WalletEntry {
                user_id: row.get(0)?,
                card_id: row.get(1)?,
                active:  row.get::<_, i32>(2)? != 0,
                notes:   row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Cards in the user's wallet flagged active, ordered by card id.
    pub fn active_wallet_cards(&self, user_id: UserId) -> EngineResult<Vec<Card>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.card_id, c.issuer, c.name, c.annual_fee_cents, c.foreign_txn_fee
             FROM wallet_entry w
             JOIN card c ON c.card_id = w.card_id
             WHERE w.user_id = ?1 AND w.active = 1
             ORDER BY c.card_id ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(Card {
                card_id:    row.get(0)?,
                issuer:     row.get(1)?,
                name:       row.get(2)?,
                annual_fee: super::cents_col(row, 3)?,
                foreign_transaction_fee: row.get::<_, i32>(4)? != 0,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
