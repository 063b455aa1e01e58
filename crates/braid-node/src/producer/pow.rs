use braid_core::types::VertexHash;
use braid_core::vertex::Vertex;
use braid_crypto::{finalize_hash, mine};
use braid_events::TimerHandle;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::manager::SharedManager;

/// A CPU miner for proof-of-work networks and local test networks. Each
/// round builds a template on the current best block, searches up to
/// `max_attempts` nonces and submits the block if one meets the target.
pub struct PowMiner {
    manager: SharedManager,
    output_script: Vec<u8>,
    max_attempts: u64,
    timer: RefCell<Option<TimerHandle>>,
}

impl PowMiner {
    pub fn new(manager: SharedManager, output_script: Vec<u8>, max_attempts: u64) -> Self {
        Self {
            manager,
            output_script,
            max_attempts,
            timer: RefCell::new(None),
        }
    }

    /// One mining round. Returns the hash of the accepted block.
    pub fn mine_once(&self) -> Option<VertexHash> {
        let (template, now, test_mode) = {
            let m = self.manager.borrow();
            let template = match m.generate_block_template(None) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "cannot build block template");
                    return None;
                }
            };
            (template, m.reactor().now(), m.settings().test_mode)
        };

        let mut vertex = Vertex::Block(template.to_block(now, self.output_script.clone(), Vec::new()));
        if test_mode {
            finalize_hash(&mut vertex);
        } else if !mine(&mut vertex, self.max_attempts) {
            debug!(height = template.height, attempts = self.max_attempts, "no solution this round");
            return None;
        }

        let hash = match self.manager.borrow_mut().try_submit(vertex) {
            Ok(h) => h,
            Err(reason) => {
                warn!(%reason, "mined block rejected");
                return None;
            }
        };
        info!(block = %hash.short(), height = template.height, "mined block");
        Some(hash)
    }

    /// Mine one round every `interval` until stopped.
    pub fn start(self: &Rc<Self>, interval: Duration) {
        let weak = Rc::downgrade(self);
        let reactor = self.manager.borrow().reactor().clone();
        let handle = reactor.call_every(
            interval,
            Box::new(move || {
                if let Some(miner) = weak.upgrade() {
                    miner.mine_once();
                }
            }),
        );
        if let Some(old) = self.timer.replace(Some(handle)) {
            old.cancel();
        }
    }

    pub fn stop(&self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::Manager;
    use braid_core::settings::Settings;
    use braid_events::{EventBus, ManualReactor};
    use braid_storage::StateDb;
    use std::sync::Arc;

    fn manager(settings: Settings) -> (SharedManager, Rc<ManualReactor>) {
        let reactor = Rc::new(ManualReactor::new(settings.genesis_timestamp + 100));
        let bus = EventBus::new(reactor.clone());
        let m = Manager::new(Arc::new(settings), StateDb::temporary().unwrap(), reactor.clone(), bus).into_shared();
        m.borrow_mut().start().unwrap();
        (m, reactor)
    }

    #[test]
    fn mines_on_the_best_block() {
        let (m, _reactor) = manager(Settings::unittests());
        let miner = PowMiner::new(m.clone(), b"miner".to_vec(), 1_000_000);
        let hash = miner.mine_once().unwrap();
        assert_eq!(m.borrow().get_best_block().unwrap().hash, hash);
        assert_eq!(m.borrow().get_best_block().unwrap().height, 1);
    }

    #[test]
    fn test_mode_skips_the_nonce_search() {
        let mut s = Settings::unittests();
        s.test_mode = true;
        let (m, reactor) = manager(s);
        let miner = Rc::new(PowMiner::new(m.clone(), b"miner".to_vec(), 0));
        miner.start(Duration::from_secs(10));
        reactor.advance(Duration::from_secs(25));
        let best = m.borrow().get_best_block().cloned().unwrap();
        assert_eq!(best.height, 3);
        assert_eq!(best.weight, 1.0);
        miner.stop();
        reactor.advance(Duration::from_secs(100));
        assert_eq!(m.borrow().get_best_block().unwrap().height, 3);
    }
}
