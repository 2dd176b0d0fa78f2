//! Simple upstream selection: pick one base URL per request, no failover.

use crate::random::RandomSource;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// How a base URL is chosen when several are configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Selection {
    /// Cycle through the base URLs in configuration order.
    #[default]
    RoundRobin,
    /// Draw a base URL uniformly at random for every request.
    Random,
}

/// Picks a base URL for requests whose URI has no scheme or host.
///
/// # Examples
///
/// ```
/// use upstream::selector::{Selection, UpstreamSelector};
/// use upstream::RandomSource;
/// use std::sync::Arc;
///
/// let selector = UpstreamSelector::new(
///     vec!["http://a:80".to_string(), "http://b:80".to_string()],
///     Selection::RoundRobin,
///     Arc::new(RandomSource::new()),
/// );
/// assert_eq!(selector.select(), Some("http://a:80"));
/// assert_eq!(selector.select(), Some("http://b:80"));
/// assert_eq!(selector.select(), Some("http://a:80"));
/// ```
#[derive(Debug)]
pub struct UpstreamSelector {
    base_urls: Vec<String>,
    selection: Selection,
    next: AtomicUsize,
    rng: Arc<RandomSource>,
}

impl UpstreamSelector {
    /// Creates a selector over `base_urls`.
    pub fn new(base_urls: Vec<String>, selection: Selection, rng: Arc<RandomSource>) -> Self {
        Self {
            base_urls,
            selection,
            next: AtomicUsize::new(0),
            rng,
        }
    }

    /// Returns the base URL for the next request, or `None` if none are
    /// configured.
    pub fn select(&self) -> Option<&str> {
        let n = self.base_urls.len();
        let index = match n {
            0 => return None,
            1 => 0,
            _ => match self.selection {
                Selection::RoundRobin => self.next.fetch_add(1, Ordering::Relaxed) % n,
                Selection::Random => self.rng.next_index(n),
            },
        };
        Some(self.base_urls[index].as_str())
    }

    /// The configured base URLs.
    pub fn base_urls(&self) -> &[String] {
        &self.base_urls
    }
}
