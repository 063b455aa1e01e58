use braid_consensus::PoaSigners;
use braid_core::constants::POA_RANDOM_DELAY_MULTIPLIER;
use braid_core::error::ConfigError;
use braid_core::types::{Timestamp, VertexHash};
use braid_core::vertex::{BlockData, Vertex, VertexLike};
use braid_crypto::{finalize_hash, sign_block, PoaKeyPair};
use braid_events::{Reactor, TimerHandle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::manager::SharedManager;

/// Proof-of-Authority block production.
///
/// Starts in `WaitingForSync`: a looping timer checks every
/// `wait_sync_delay` seconds whether the manager may produce, and once it
/// may, switches to `Producing` and stops itself. Independently, a tick every
/// `avg_time_between_blocks` looks at the best block; when it changed since
/// the last tick, the next block is scheduled for its expected timestamp.
pub struct PoaBlockProducer {
    inner: Rc<RefCell<ProducerState>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProducerPhase {
    WaitingForSync,
    Producing,
}

struct ProducerState {
    manager: SharedManager,
    reactor: Rc<dyn Reactor>,
    keypair: PoaKeyPair,
    signers: PoaSigners,
    signer_index: usize,
    avg_time_between_blocks: u64,
    wait_sync_delay: u64,
    rng: StdRng,

    phase: ProducerPhase,
    last_seen_best_block: Option<VertexHash>,
    wait_sync_timer: Option<TimerHandle>,
    tick_timer: Option<TimerHandle>,
    scheduled: Vec<TimerHandle>,
}

impl PoaBlockProducer {
    /// Fails with [`ConfigError::NotASigner`] when `keypair` is not one of the
    /// configured signers.
    pub fn new(manager: SharedManager, keypair: PoaKeyPair) -> Result<Self, ConfigError> {
        Self::with_rng(manager, keypair, StdRng::from_entropy())
    }

    pub fn with_rng(manager: SharedManager, keypair: PoaKeyPair, rng: StdRng) -> Result<Self, ConfigError> {
        let (reactor, signers, avg_time_between_blocks, wait_sync_delay) = {
            let m = manager.borrow();
            let settings = m.settings();
            let poa = settings.poa().ok_or(ConfigError::PoaNotConfigured)?;
            (
                m.reactor().clone(),
                PoaSigners::new(poa),
                settings.avg_time_between_blocks,
                poa.wait_sync_delay,
            )
        };
        let signer_index = signers.signer_index(&keypair.public_key)?;
        info!(
            signer = %keypair.signer_id,
            index = signer_index,
            signers = signers.len(),
            "PoA signer configured"
        );

        Ok(Self {
            inner: Rc::new(RefCell::new(ProducerState {
                manager,
                reactor,
                keypair,
                signers,
                signer_index,
                avg_time_between_blocks,
                wait_sync_delay,
                rng,
                phase: ProducerPhase::WaitingForSync,
                last_seen_best_block: None,
                wait_sync_timer: None,
                tick_timer: None,
                scheduled: Vec::new(),
            })),
        })
    }

    pub fn signer_index(&self) -> usize {
        self.inner.borrow().signer_index
    }

    pub fn phase(&self) -> ProducerPhase {
        self.inner.borrow().phase
    }

    pub fn start(&self) {
        let weak = Rc::downgrade(&self.inner);
        let (reactor, wait, tick) = {
            let s = self.inner.borrow();
            (
                s.reactor.clone(),
                Duration::from_secs(s.wait_sync_delay),
                Duration::from_secs(s.avg_time_between_blocks),
            )
        };

        let w = weak.clone();
        let wait_timer = reactor.call_every(wait, Box::new(move || with_state(&w, start_producing)));
        let w = weak;
        let tick_timer = reactor.call_every(tick, Box::new(move || with_state(&w, schedule_block)));

        let mut s = self.inner.borrow_mut();
        s.wait_sync_timer = Some(wait_timer);
        s.tick_timer = Some(tick_timer);
    }

    /// Cancel every timer, including block production already scheduled.
    pub fn stop(&self) {
        let mut s = self.inner.borrow_mut();
        let mut timers: Vec<TimerHandle> = s.scheduled.drain(..).collect();
        timers.extend(s.wait_sync_timer.take());
        timers.extend(s.tick_timer.take());
        for timer in timers {
            timer.cancel();
        }
        debug!(index = s.signer_index, "PoA producer stopped");
    }
}

fn with_state(weak: &Weak<RefCell<ProducerState>>, f: fn(&Rc<RefCell<ProducerState>>)) {
    if let Some(state) = weak.upgrade() {
        f(&state);
    }
}

fn start_producing(state: &Rc<RefCell<ProducerState>>) {
    let mut s = state.borrow_mut();
    if !s.manager.borrow().can_start_producing() {
        warn!("cannot start producing new blocks, node not synced");
        return;
    }
    info!(index = s.signer_index, "started producing new blocks");
    s.phase = ProducerPhase::Producing;
    if let Some(timer) = s.wait_sync_timer.take() {
        timer.cancel();
    }
}

fn schedule_block(state: &Rc<RefCell<ProducerState>>) {
    let mut s = state.borrow_mut();
    let previous = match s.manager.borrow().get_best_block() {
        Some(b) => b.clone(),
        None => return,
    };
    if s.phase != ProducerPhase::Producing || s.last_seen_best_block == Some(previous.hash) {
        return;
    }
    s.last_seen_best_block = Some(previous.hash);

    let now = s.reactor.now();
    let expected = expected_block_timestamp(&mut s, &previous);
    let delay = (expected - now).max(0) as u64;

    let weak = Rc::downgrade(state);
    let parent = previous.hash;
    let timer = s.reactor.call_later(
        Duration::from_secs(delay),
        Box::new(move || {
            if let Some(state) = weak.upgrade() {
                produce_block(&state, parent);
            }
        }),
    );
    s.scheduled.retain(|t| !t.is_cancelled());
    s.scheduled.push(timer);
    debug!(
        previous_block = %previous.hash.short(),
        previous_height = previous.height,
        delay,
        "scheduling block production"
    );
}

/// `parent.timestamp + avg_time`, plus a jitter in `[1, signer_count]`
/// seconds when this signer is out of turn.
fn expected_block_timestamp(s: &mut ProducerState, previous: &BlockData) -> Timestamp {
    let height = previous.height + 1;
    let timestamp = previous.timestamp + s.avg_time_between_blocks as Timestamp;
    if s.signers.is_in_turn(height, s.signer_index) {
        return timestamp;
    }
    let range = s.signers.len() as u64 * POA_RANDOM_DELAY_MULTIPLIER;
    let offset = s.rng.gen_range(0..range.max(1)) + 1;
    timestamp + offset as Timestamp
}

fn produce_block(state: &Rc<RefCell<ProducerState>>, parent: VertexHash) {
    let s = state.borrow();
    let template = match s.manager.borrow().generate_block_template(Some(parent)) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, parent = %parent.short(), "cannot build block template");
            return;
        }
    };

    let now = s.reactor.now();
    let mut block = template.to_block(now, s.keypair.signer_id.0.to_vec(), Vec::new());
    block.weight = s.signers.calculate_weight(block.height, s.signer_index);
    if let Err(e) = sign_block(&s.keypair, &mut block) {
        warn!(error = %e, "failed to sign block");
        return;
    }
    let mut vertex = Vertex::Block(block);
    let hash = finalize_hash(&mut vertex);

    let accepted = s.manager.borrow_mut().submit_vertex(vertex.clone());
    let voided = s
        .manager
        .borrow()
        .get_metadata(&hash)
        .map_or(true, |m| m.is_voided());
    debug!(
        block = %hash.short(),
        height = template.height,
        weight = vertex.weight(),
        parent = %parent.short(),
        accepted,
        voided,
        "produced new block"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::Manager;
    use braid_core::settings::{ConsensusSettings, PoaSettings, PoaSignerSettings, Settings};
    use braid_events::{EventBus, ManualReactor};
    use braid_storage::StateDb;
    use std::sync::Arc;

    fn manager_with(signers: &[&PoaKeyPair], reactor: Rc<ManualReactor>) -> SharedManager {
        let mut settings = Settings::unittests();
        settings.consensus = ConsensusSettings::Poa(PoaSettings {
            signers: signers
                .iter()
                .map(|k| PoaSignerSettings { public_key: k.public_key.clone() })
                .collect(),
            wait_sync_delay: 30,
        });
        let bus = EventBus::new(reactor.clone());
        let m = Manager::new(Arc::new(settings), StateDb::temporary().unwrap(), reactor, bus);
        m.into_shared()
    }

    #[test]
    fn unknown_key_is_fatal_config() {
        let reactor = Rc::new(ManualReactor::new(0));
        let signer = PoaKeyPair::generate();
        let manager = manager_with(&[&signer], reactor);
        let stranger = PoaKeyPair::generate();
        assert!(matches!(
            PoaBlockProducer::new(manager, stranger),
            Err(ConfigError::NotASigner(_))
        ));
    }

    #[test]
    fn waits_for_sync_before_producing() {
        let start = Settings::unittests().genesis_timestamp;
        let reactor = Rc::new(ManualReactor::new(start));
        let signer = PoaKeyPair::generate();
        let manager = manager_with(&[&signer], reactor.clone());
        manager.borrow_mut().start().unwrap();

        let producer = PoaBlockProducer::new(manager.clone(), signer).unwrap();
        producer.start();
        reactor.run_pending();
        assert_eq!(producer.phase(), ProducerPhase::WaitingForSync);

        manager.borrow_mut().set_synced(true);
        reactor.advance(Duration::from_secs(29));
        assert_eq!(producer.phase(), ProducerPhase::WaitingForSync);
        reactor.advance(Duration::from_secs(1));
        assert_eq!(producer.phase(), ProducerPhase::Producing);
        producer.stop();
    }

    #[test]
    fn single_signer_extends_the_chain() {
        let start = Settings::unittests().genesis_timestamp;
        let reactor = Rc::new(ManualReactor::new(start));
        let signer = PoaKeyPair::generate();
        let manager = manager_with(&[&signer], reactor.clone());
        manager.borrow_mut().start().unwrap();
        manager.borrow_mut().set_synced(true);

        let producer = PoaBlockProducer::new(manager.clone(), signer).unwrap();
        producer.start();
        // one signer is always in turn: a block every 64s
        reactor.advance(Duration::from_secs(64 * 3));
        let best = manager.borrow().get_best_block().cloned().unwrap();
        assert_eq!(best.height, 3);
        assert_eq!(best.weight, 2.0);
        assert_eq!(best.timestamp, start + 64 * 3);
        producer.stop();

        reactor.advance(Duration::from_secs(64 * 3));
        assert_eq!(manager.borrow().get_best_block().unwrap().height, 3);
    }
}
