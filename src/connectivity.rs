//! Online/offline tracking.
//!
//! The monitor is driven by whoever observes the platform: a push source
//! calls [`ConnectivityMonitor::report`] directly, otherwise [`spawn_probe`]
//! polls a [`Probe`] at a bounded interval.

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use url::Url;

use crate::error::{OfflineError, Result};

/// Probing never runs more often than this.
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

impl Connectivity {
  pub fn is_online(&self) -> bool {
    matches!(self, Connectivity::Online)
  }
}

impl fmt::Display for Connectivity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Connectivity::Online => write!(f, "online"),
      Connectivity::Offline => write!(f, "offline"),
    }
  }
}

type Listener = Arc<dyn Fn(Connectivity) + Send + Sync>;

/// Current connectivity plus change notification.
///
/// Listeners fire exactly once per transition; repeated reports of the
/// current state are ignored.
pub struct ConnectivityMonitor {
  state: watch::Sender<Connectivity>,
  listeners: Mutex<Vec<Listener>>,
}

impl ConnectivityMonitor {
  pub fn new(initial: Connectivity) -> Self {
    let (state, _) = watch::channel(initial);
    Self {
      state,
      listeners: Mutex::new(Vec::new()),
    }
  }

  pub fn current(&self) -> Connectivity {
    *self.state.borrow()
  }

  /// Async view of the state; the receiver wakes on every transition.
  pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
    self.state.subscribe()
  }

  /// Register a callback for transitions.
  pub fn on_change(&self, listener: impl Fn(Connectivity) + Send + Sync + 'static) {
    self
      .listeners
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push(Arc::new(listener));
  }

  /// Feed an observed state. Returns true if it was a transition.
  ///
  /// Listeners run without any lock held, so they may register further
  /// listeners or report again.
  pub fn report(&self, observed: Connectivity) -> bool {
    let changed = self.state.send_if_modified(|current| {
      if *current == observed {
        false
      } else {
        *current = observed;
        true
      }
    });

    if changed {
      info!(state = %observed, "connectivity changed");
      let listeners = self
        .listeners
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
      for listener in listeners.iter() {
        listener(observed);
      }
    }
    changed
  }
}

/// A one-shot connectivity check.
#[async_trait]
pub trait Probe: Send + Sync {
  async fn probe(&self) -> Connectivity;
}

/// Probe that sends a HEAD request; any HTTP answer means online.
pub struct HttpProbe {
  client: reqwest::Client,
  url: Url,
}

impl HttpProbe {
  pub fn new(url: Url, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| OfflineError::Network(format!("failed to build probe client: {}", e)))?;

    Ok(Self { client, url })
  }
}

#[async_trait]
impl Probe for HttpProbe {
  async fn probe(&self) -> Connectivity {
    match self.client.head(self.url.clone()).send().await {
      Ok(response) => {
        debug!(url = %self.url, status = %response.status(), "probe answered");
        Connectivity::Online
      }
      Err(err) => {
        debug!(url = %self.url, error = %err, "probe failed");
        Connectivity::Offline
      }
    }
  }
}

/// Poll `probe` every `interval` (at least [`MIN_PROBE_INTERVAL`]) and feed
/// the results to `monitor`.
pub fn spawn_probe(
  monitor: Arc<ConnectivityMonitor>,
  probe: Arc<dyn Probe>,
  interval: Duration,
) -> JoinHandle<()> {
  let interval = interval.max(MIN_PROBE_INTERVAL);

  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      ticker.tick().await;
      let observed = probe.probe().await;
      monitor.report(observed);
    }
  })
}
