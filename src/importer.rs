//! Import coordination: parse, upsert channels by stream URL, and replace an
//! owner's ordered channel associations inside one transaction.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ImportError, StoreError};
use crate::m3u_parser;
use crate::models::{timestamp_now, Owner, ParsedItem};

/// Transactional storage consumed by [`ImportCoordinator`]
pub trait ChannelStore {
    type Tx<'a>: ChannelTx
    where
        Self: 'a;

    fn begin(&mut self) -> Result<Self::Tx<'_>, StoreError>;
}

/// One open transaction. Dropping it without [`ChannelTx::commit`] rolls back.
pub trait ChannelTx {
    /// Insert a channel, or overwrite the descriptive fields of the channel
    /// with the same stream URL. Returns the durable channel id.
    fn upsert_channel(&mut self, item: &ParsedItem, created_at: &str) -> Result<i64, StoreError>;

    fn clear_associations(&mut self, owner: Owner) -> Result<(), StoreError>;

    fn associate(&mut self, owner: Owner, channel_id: i64, position: i64) -> Result<(), StoreError>;

    fn commit(self) -> Result<(), StoreError>
    where
        Self: Sized;
}

/// Outcome of a successful import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportReport {
    /// Entries produced by the parser
    pub parsed: usize,
    /// Entries associated with the owner
    pub imported: usize,
    /// Entries skipped for an empty stream URL
    pub skipped: usize,
}

pub struct ImportCoordinator<'a, S> {
    store: &'a mut S,
}

impl<'a, S: ChannelStore> ImportCoordinator<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Replace a playlist's channels with the entries parsed from `raw`.
    ///
    /// Empty input and input without entries are rejected before any write.
    pub fn import_playlist(
        &mut self,
        playlist_id: i64,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportReport, ImportError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ImportError::EmptyContent);
        }

        let items = m3u_parser::parse_reader(raw.as_bytes()).map_err(ImportError::Read)?;
        if items.is_empty() {
            return Err(ImportError::NoChannels);
        }
        self.import_items(playlist_id, &items, cancel)
    }

    /// Replace a playlist's channels with already parsed entries.
    ///
    /// Positions are indices into `items`, so entries skipped for an empty
    /// stream URL leave gaps. Any failure rolls the whole import back.
    pub fn import_items(
        &mut self,
        playlist_id: i64,
        items: &[ParsedItem],
        cancel: &CancellationToken,
    ) -> Result<ImportReport, ImportError> {
        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled);
        }

        let owner = Owner::Playlist(playlist_id);
        let created_at = timestamp_now();
        let mut report = ImportReport {
            parsed: items.len(),
            ..Default::default()
        };

        let mut tx = self.store.begin()?;
        if let Err(e) = write_items(&mut tx, owner, items, &created_at, &mut report) {
            warn!("{}: import failed, rolling back: {}", owner, e);
            return Err(e.into());
        }
        if cancel.is_cancelled() {
            warn!("{}: import cancelled, rolling back", owner);
            return Err(ImportError::Cancelled);
        }
        if let Err(e) = tx.commit() {
            warn!("{}: commit failed: {}", owner, e);
            return Err(e.into());
        }

        info!(
            "{}: imported {} of {} parsed channels",
            owner, report.imported, report.parsed
        );
        Ok(report)
    }

    /// Replace a user's or package's channel selection with existing channel ids.
    ///
    /// Positions are indices into `channel_ids`; non-positive ids are skipped.
    /// Returns the number of associated channels.
    pub fn replace_selection(
        &mut self,
        owner: Owner,
        channel_ids: &[i64],
        cancel: &CancellationToken,
    ) -> Result<usize, ImportError> {
        if let Owner::Playlist(_) = owner {
            return Err(StoreError::invalid("playlist channels are replaced by import only").into());
        }

        let mut tx = self.store.begin()?;
        let associated = match write_selection(&mut tx, owner, channel_ids) {
            Ok(n) => n,
            Err(e) => {
                warn!("{}: selection update failed, rolling back: {}", owner, e);
                return Err(e.into());
            }
        };
        if cancel.is_cancelled() {
            warn!("{}: selection update cancelled, rolling back", owner);
            return Err(ImportError::Cancelled);
        }
        if let Err(e) = tx.commit() {
            warn!("{}: commit failed: {}", owner, e);
            return Err(e.into());
        }

        info!("{}: selection replaced with {} channels", owner, associated);
        Ok(associated)
    }
}

/// Clear the playlist's associations and re-associate `items` by index
fn write_items<T: ChannelTx>(
    tx: &mut T,
    owner: Owner,
    items: &[ParsedItem],
    created_at: &str,
    report: &mut ImportReport,
) -> Result<(), StoreError> {
    tx.clear_associations(owner)?;
    for (position, item) in items.iter().enumerate() {
        if item.stream_url.is_empty() {
            debug!("{}: skipping entry {} ({}) without stream url", owner, position, item.name);
            report.skipped += 1;
            continue;
        }
        let channel_id = tx.upsert_channel(item, created_at)?;
        tx.associate(owner, channel_id, position as i64)?;
        report.imported += 1;
    }
    Ok(())
}

fn write_selection<T: ChannelTx>(tx: &mut T, owner: Owner, channel_ids: &[i64]) -> Result<usize, StoreError> {
    tx.clear_associations(owner)?;
    let mut associated = 0;
    for (position, &channel_id) in channel_ids.iter().enumerate() {
        if channel_id <= 0 {
            continue;
        }
        tx.associate(owner, channel_id, position as i64)?;
        associated += 1;
    }
    Ok(associated)
}

#[cfg(test)]
#[path = "importer_tests.rs"]
mod tests;
