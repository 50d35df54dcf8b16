//! Slot registry: teachers publish and withdraw bookable windows.
//!
//! Booking and release happen inside the booking and refund transactions
//! through [`SlotRegistry::lock_and_load`] and the pure transitions on
//! [`Slot`].

use crate::finish;
use std::sync::Arc;
use tutoring_core::{Caller, Error, NewSlot, Result, Role, Slot, SlotId, Store, Transaction};

/// Publishes, withdraws and locks slots.
#[derive(Clone)]
pub struct SlotRegistry {
    store: Arc<dyn Store>,
}

impl SlotRegistry {
    /// Creates a registry.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Publish a new unbooked slot owned by the calling teacher.
    ///
    /// # Errors
    ///
    /// - [`Error::Forbidden`] if the caller is not the teacher named in `new`
    /// - [`Error::NotFound`] if the teacher does not exist
    /// - [`Error::Validation`] for an empty window or non-positive price
    #[tracing::instrument(skip(self, new), fields(teacher_id = %new.teacher_id))]
    pub async fn publish(&self, caller: Caller, new: NewSlot) -> Result<Slot> {
        if caller.role != Role::Teacher || caller.id != new.teacher_id {
            return Err(Error::Forbidden(
                "only the teacher can publish their own slots".to_string(),
            ));
        }
        let slot = Slot::publish(new)?;

        let mut tx = self.store.begin().await?;
        let result = async {
            tx.load_user(slot.teacher_id).await?;
            tx.insert_slot(&slot).await?;
            Ok::<_, Error>(slot)
        }
        .await;
        let slot = finish(tx, result).await?;

        tracing::info!(
            slot_id = %slot.id,
            starts_at = %slot.starts_at(),
            price = slot.price.amount(),
            "Slot published"
        );
        Ok(slot)
    }

    /// Delete an unbooked slot.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the slot does not exist
    /// - [`Error::Forbidden`] if the caller does not own it
    /// - [`Error::Conflict`] if it is booked
    #[tracing::instrument(skip(self), fields(caller_id = %caller.id))]
    pub async fn withdraw(&self, caller: Caller, slot_id: SlotId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let slot = tx.lock_slot(slot_id).await?;
            if slot.teacher_id != caller.id {
                return Err(Error::Forbidden(format!(
                    "slot {slot_id} belongs to another teacher"
                )));
            }
            if slot.is_booked {
                return Err(Error::Conflict(format!(
                    "slot {slot_id} is booked and cannot be withdrawn"
                )));
            }
            tx.delete_slot(slot_id).await
        }
        .await;
        finish(tx, result).await?;

        tracing::info!(%slot_id, "Slot withdrawn");
        Ok(())
    }

    /// Read a slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the slot does not exist.
    pub async fn get(&self, slot_id: SlotId) -> Result<Slot> {
        let mut tx = self.store.begin().await?;
        let result = tx.load_slot(slot_id).await;
        finish(tx, result).await
    }

    /// Exclusively lock a slot for the rest of `tx`, then load it.
    ///
    /// The lock is taken before anything reads `is_booked`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the slot does not exist.
    pub async fn lock_and_load(tx: &mut dyn Transaction, slot_id: SlotId) -> Result<Slot> {
        tx.lock_slot(slot_id).await
    }
}
