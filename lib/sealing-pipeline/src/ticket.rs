use std::sync::Arc;

use primitives_proofs::{
    ActorId, ChainEpoch, DomainSeparationTag, IdAddress, Ticket, SEAL_RANDOMNESS_LOOKBACK,
};

use crate::chain::{ChainApi, ChainError};

/// Draws the sealing randomness (ticket) of a sector from the chain.
#[derive(Clone)]
pub struct TicketResolver {
    chain: Arc<dyn ChainApi>,
}

impl TicketResolver {
    pub fn new(chain: Arc<dyn ChainApi>) -> Self {
        Self { chain }
    }

    /// Returns the ticket for a sector owned by `owner` along with the epoch
    /// it was drawn at.
    ///
    /// The ticket comes from [`SEAL_RANDOMNESS_LOOKBACK`] epochs before the
    /// current head, the entropy is the CBOR encoded ID address of the owner.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, owner: ActorId) -> Result<(Ticket, ChainEpoch), ChainError> {
        let head = self.chain.chain_head().await?;
        let ticket_epoch = head.height - SEAL_RANDOMNESS_LOOKBACK;

        let entropy = IdAddress::new(owner).marshal_cbor()?;
        let randomness = self
            .chain
            .randomness_from_tickets(
                DomainSeparationTag::SealRandomness,
                ticket_epoch,
                &entropy,
                &head.key,
            )
            .await?;

        let ticket = Ticket::try_from(randomness.as_slice())
            .map_err(|_| ChainError::InvalidRandomnessLength(randomness.len()))?;
        tracing::debug!(ticket_epoch, ticket = %hex::encode(ticket), "resolved ticket");

        Ok((ticket, ticket_epoch))
    }
}
