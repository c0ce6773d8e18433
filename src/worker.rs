use fieldx::fxstruct;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::codec;
use crate::state::MaterializedState;
use crate::traits::DurableLog;
use crate::traits::Entity;
use crate::traits::Observer;
use crate::types::Delivery;

/// Exponential backoff with jitter for failed claims. Each delay falls between half and all of the current step; the
/// step doubles up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max:     Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let step = self.current.as_millis() as u64;
        self.current = (self.current * 2).min(self.max);

        let half = step / 2;
        Duration::from_millis(half + rand::rng().random_range(0..=step - half))
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(5))
    }
}

// One member of the consumer group. Loops claim -> apply -> ack until the shutdown flag flips. Only the claim is ever
// interrupted; a delivery that has been claimed is always applied and acknowledged.
#[fxstruct(no_new, builder, default(off))]
pub(crate) struct Worker<L, E>
where
    L: DurableLog,
    E: Entity,
{
    ordinal:     usize,
    consumer:    String,
    stream:      String,
    group:       String,
    log:         Arc<L>,
    state:       Arc<MaterializedState<E>>,
    #[fieldx(default(1))]
    fetch_count: usize,
    #[fieldx(default(Backoff::default()))]
    backoff:     Backoff,
    #[fieldx(optional)]
    observer:    Arc<dyn Observer<E>>,
    shutdown:    watch::Receiver<bool>,
}

impl<L, E> Worker<L, E>
where
    L: DurableLog,
    E: Entity,
{
    pub(crate) async fn run(mut self) {
        info!(worker = self.ordinal, consumer = %self.consumer, "worker started");

        loop {
            if *self.shutdown.borrow_and_update() {
                break;
            }

            let claimed = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                claimed = self.log.claim(&self.stream, &self.group, &self.consumer, self.fetch_count) => claimed,
            };

            match claimed {
                Ok(deliveries) => {
                    self.backoff.reset();
                    for delivery in deliveries {
                        self.process(delivery).await;
                    }
                }
                Err(err) => {
                    let delay = self.backoff.next_delay();
                    error!(
                        worker = self.ordinal,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "failed to read from stream"
                    );
                    if let Some(observer) = &self.observer {
                        observer.on_error(self.ordinal, &err).await;
                    }
                    tokio::select! {
                        biased;
                        _ = self.shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(worker = self.ordinal, consumer = %self.consumer, "worker stopped");
    }

    #[instrument(level = "trace", skip(self, delivery), fields(worker = self.ordinal, position = %delivery.position))]
    async fn process(&self, delivery: Delivery) {
        let Delivery { position, record } = delivery;

        match codec::decode::<E>(&record) {
            Ok(command) => {
                let id = command.id().clone();
                let method = command.method();
                let observed = self.observer.as_ref().map(|_| command.clone());
                let outcome = self.state.apply(command);
                debug!(worker = self.ordinal, %position, %id, %method, ?outcome, "applied command");

                if let (Some(observer), Some(command)) = (&self.observer, &observed) {
                    observer.on_applied(self.ordinal, position, command).await;
                }
            }
            Err(err) => {
                // Acknowledge anyway: a record nobody can decode must not pin the group at this position.
                warn!(worker = self.ordinal, %position, error = %err, "skipping undecodable record");
                if let Some(observer) = &self.observer {
                    observer.on_poison(self.ordinal, position, &err).await;
                }
            }
        }

        match self.log.ack(&self.stream, &self.group, position).await {
            Ok(()) => {
                if let Some(observer) = &self.observer {
                    observer.on_acked(self.ordinal, position).await;
                }
            }
            Err(err) => {
                error!(worker = self.ordinal, %position, error = %err, "failed to acknowledge record");
                if let Some(observer) = &self.observer {
                    observer.on_error(self.ordinal, &err).await;
                }
            }
        }
    }
}
