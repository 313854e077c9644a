use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Bounded worker pool for one kind of RPC fan-out.
///
/// Tasks are spawned immediately but only run while holding a permit, so at
/// most `capacity` of them talk to peers at once. Capacity follows the
/// cluster size through [`FanoutPool::tune`].
pub struct FanoutPool {
    name: &'static str,
    permits: Arc<Semaphore>,
    capacity: Mutex<usize>,
}

impl FanoutPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity: Mutex::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.lock().map(|c| *c).unwrap_or(1)
    }

    /// Resize to `size` workers. Shrinking only retires idle permits; permits
    /// held by running tasks stay in circulation until a later tune.
    pub fn tune(&self, size: usize) {
        let size = size.max(1);
        let Ok(mut capacity) = self.capacity.lock() else {
            return;
        };
        if size > *capacity {
            self.permits.add_permits(size - *capacity);
            *capacity = size;
        } else if size < *capacity {
            let retired = self.permits.forget_permits(*capacity - size);
            *capacity -= retired;
        }
        log::debug!("{} pool tuned to {} workers", self.name, *capacity);
    }

    pub fn spawn<F>(&self, task: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            Some(task.await)
        })
    }
}

/// The three fan-out operations each get their own pool.
pub struct FanoutPools {
    pub heartbeat: FanoutPool,
    pub vote: FanoutPool,
    pub sync: FanoutPool,
}

impl FanoutPools {
    pub fn new(size: usize) -> Self {
        Self {
            heartbeat: FanoutPool::new("heartbeat", size),
            vote: FanoutPool::new("vote", size),
            sync: FanoutPool::new("sync", size),
        }
    }

    pub fn tune(&self, size: usize) {
        self.heartbeat.tune(size);
        self.vote.tune(size);
        self.sync.tune(size);
    }
}
