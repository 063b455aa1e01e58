use braid_core::settings::Settings;
use braid_core::types::Amount;

/// Largest number of halvings before issuance is pinned to the minimum.
const MAXIMUM_NUMBER_OF_HALVINGS: u64 = 63;

/// Block reward at `height`: the initial reward halved once every
/// `blocks_per_halving` blocks, never below `minimum_tokens_per_block`.
/// Height 0 is the genesis block, which issues `genesis_tokens` instead.
pub fn tokens_issued_per_block(settings: &Settings, height: u64) -> Amount {
    if height == 0 {
        return settings.genesis_tokens;
    }
    let halvings = (height - 1) / settings.blocks_per_halving;
    if halvings > MAXIMUM_NUMBER_OF_HALVINGS {
        return settings.minimum_tokens_per_block;
    }
    let amount = settings.initial_tokens_per_block >> halvings;
    amount.max(settings.minimum_tokens_per_block)
}
