//! Source discovery and selection over the shared descriptor table.

use cspgrab_core::{CaptureConfig, CaptureError, SourceDescriptor};
use tracing::{info, warn};

use crate::channel::SharedChannel;
use crate::wait::Poller;

/// Picks the source a session captures from.
///
/// Selection is first-match in table order. A configured preferred name wins
/// over table order when a selectable source carries it.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    request_code: u16,
    preferred_name: Option<String>,
}

impl SourceRegistry {
    pub fn new(request_code: u16) -> Self {
        Self { request_code, preferred_name: None }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self { request_code: config.request_code, preferred_name: config.preferred_name.clone() }
    }

    pub fn with_preferred_name(mut self, name: Option<String>) -> Self {
        self.preferred_name = name;
        self
    }

    /// Block until the producer publishes at least one descriptor,
    /// heartbeating on every poll.
    pub fn wait_for_any_source(
        &self,
        channel: &SharedChannel,
        poller: &Poller,
    ) -> Result<usize, CaptureError> {
        let table = channel.table()?;
        channel.heartbeat();
        if table.items_count() == 0 {
            info!("Waiting for a texture source to be published…");
        }
        poller.poll_until(|| {
            channel.heartbeat();
            table.items_count() > 0
        })?;
        Ok(table.items_count())
    }

    /// Snapshot every populated descriptor, in table order.
    pub fn enumerate(&self, channel: &SharedChannel) -> Result<Vec<SourceDescriptor>, CaptureError> {
        Ok(channel.table()?.slots().map(|slot| slot.snapshot()).collect())
    }

    /// Select a source and ask the producer to start rendering into it.
    pub fn select_first_valid(&self, channel: &SharedChannel) -> Result<SourceDescriptor, CaptureError> {
        let sources = self.enumerate(channel)?;
        for source in &sources {
            info!("Source {} valid={}", source, source.is_selectable());
        }

        let mut chosen = pick_source(&sources, self.preferred_name.as_deref())
            .cloned()
            .ok_or(CaptureError::NoValidSource { count: sources.len() })?;

        if let Some(wanted) = &self.preferred_name {
            if &chosen.name != wanted {
                warn!("Preferred source {:?} not available, falling back to table order", wanted);
            }
        }

        if let Some(slot) = channel.table()?.slot(chosen.index) {
            slot.set_needs_data(self.request_code);
        }
        chosen.needs_data = self.request_code;
        info!(
            "Using texture '{}' (handle=0x{:08X}, size={}x{})",
            chosen.name, chosen.handle, chosen.width, chosen.height
        );
        Ok(chosen)
    }
}

/// First selectable descriptor in slice order, with a preferred name taking
/// precedence when one matches.
pub fn pick_source<'a>(
    sources: &'a [SourceDescriptor],
    preferred_name: Option<&str>,
) -> Option<&'a SourceDescriptor> {
    let preferred = preferred_name
        .and_then(|wanted| sources.iter().find(|s| s.is_selectable() && s.name == wanted));
    preferred.or_else(|| sources.iter().find(|s| s.is_selectable()))
}
