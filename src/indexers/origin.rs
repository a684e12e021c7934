use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::Transaction;
use tracing::{debug, warn};

use crate::{
    client::{ApiError, IndexerApi, OrdfsMetadata},
    error::Error,
    types::Outpoint,
};

use super::{
    Indexer, Owners, ParseContext, ParseResult, Txo, bsv21, is_owned, script,
    types::{IndexPayload, IndexSummary},
};

/// Largest content size eagerly fetched into `IndexData::content`.
const MAX_EAGER_CONTENT: u64 = 1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginData {
    /// Outpoint at which the 1-sat ordinal was first minted. For a new
    /// origin this is the output's own outpoint.
    pub outpoint: Outpoint,
    /// Transfer count since mint; a fresh origin starts at 0.
    pub nonce: u64,
    /// Inherited MAP data merged under this output's own entries.
    pub map: Option<BTreeMap<String, String>>,
    pub parent: Option<Outpoint>,
}

/// Tracks the provenance of 1-sat ordinals: whether an output continues an
/// existing origin (transfer) or mints a new one, enriched from OrdFS.
pub struct OriginIndexer {
    owners: Owners,
}

impl OriginIndexer {
    pub fn new(owners: Owners) -> Self {
        Self { owners }
    }
}

#[async_trait]
impl Indexer for OriginIndexer {
    fn tag(&self) -> &'static str {
        "origin"
    }

    fn parse(&self, txo: &Txo, _tx: &Transaction, _vout: usize) -> Option<ParseResult> {
        if txo.satoshis != 1 || bsv21::is_token_payload(&txo.script) {
            return None;
        }

        // preliminary; summarize resolves transfers against the inputs
        let data = OriginData {
            outpoint: txo.outpoint,
            nonce: 0,
            map: None,
            parent: script::find_envelope(&txo.script).and_then(|e| e.parent),
        };

        Some(ParseResult::new(IndexPayload::Origin(Box::new(data))).with_basket("1sat"))
    }

    async fn summarize(
        &self,
        ctx: &mut ParseContext,
        api: &dyn IndexerApi,
        _is_broadcast: bool,
    ) -> Result<Option<IndexSummary>, Error> {
        // cumulative satoshi positions of the inputs, in order
        let mut input_positions = vec![];
        let mut acc = 0u64;
        for spend in &ctx.spends {
            input_positions.push((acc, spend.satoshis, spend.outpoint));
            acc += spend.satoshis;
        }

        let mut out_position = 0u64;

        for vout in 0..ctx.txos.len() {
            let position = out_position;
            out_position += ctx.txos[vout].satoshis;

            if !ctx.txos[vout].data.contains_key(self.tag()) {
                continue;
            }

            // a transfer continues the 1-sat input aligned to the same
            // cumulative position
            let source = input_positions
                .iter()
                .find(|(pos, sats, _)| *pos == position && *sats == 1)
                .map(|(_, _, outpoint)| *outpoint);

            let enrichment = match source {
                Some(source_outpoint) => {
                    match api.ordfs_metadata(&source_outpoint, None).await {
                        Ok(metadata) => Some(metadata),
                        Err(ApiError::NotFound) => {
                            debug!(%source_outpoint, "no ordfs metadata; treating as new origin");
                            None
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                None => None,
            };

            let txo = &mut ctx.txos[vout];
            let own_map = txo
                .data
                .get("map")
                .and_then(|entry| match &entry.data {
                    IndexPayload::Map(map) => Some(map.data.clone()),
                    _ => None,
                })
                .unwrap_or_default();

            let entry = txo.data.get_mut(self.tag()).expect("checked above");
            let IndexPayload::Origin(data) = &mut entry.data else {
                continue;
            };

            // inherited MAP data merges under current
            let mut merged = BTreeMap::new();

            if let Some(metadata) = &enrichment {
                if let Some(origin) = metadata
                    .origin
                    .as_deref()
                    .and_then(|s| Outpoint::from_str(s).ok())
                {
                    data.outpoint = origin;
                }
                data.nonce = metadata.sequence + 1;

                if let Some(inherited) = &metadata.map {
                    merged.extend(inherited.clone());
                }
            }

            merged.extend(own_map);
            if !merged.is_empty() {
                data.map = Some(merged);
            }

            // parent claims only survive fresh metadata
            if let Some(parent) = data.parent {
                match api.ordfs_metadata(&parent, None).await {
                    Ok(_) => {}
                    Err(ApiError::NotFound) => {
                        debug!(%parent, "parent claim not found; clearing");
                        data.parent = None;
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            let origin_outpoint = data.outpoint;
            let name = data.map.as_ref().and_then(|m| m.get("name").cloned());

            // the output's own envelope names the type; a bare transfer
            // falls back to the source metadata
            let content_type = txo
                .data
                .get("insc")
                .and_then(|entry| match &entry.data {
                    IndexPayload::Inscription(insc) => Some(insc.file.content_type.clone()),
                    _ => None,
                })
                .or_else(|| enrichment.as_ref().and_then(|m| m.content_type.clone()));

            // tags only apply to outputs we own
            let owned = txo
                .owner
                .as_deref()
                .is_some_and(|owner| is_owned(&self.owners, owner));

            if owned {
                let entry = txo.data.get_mut(self.tag()).expect("checked above");
                entry.tags.push(format!("origin:{origin_outpoint}"));

                if let Some(content_type) = &content_type {
                    let base = content_type.split(';').next().unwrap_or(content_type);
                    if let Some(category) = base.split('/').next() {
                        entry.tags.push(format!("type:{category}"));
                    }
                    entry.tags.push(format!("type:{base}"));
                }

                if let Some(name) = &name {
                    entry.tags.push(format!("name:{name}"));
                }
            }

            self.fetch_text_content(ctx, vout, &origin_outpoint, enrichment.as_ref(), api)
                .await;
        }

        Ok(None)
    }
}

impl OriginIndexer {
    /// Eagerly pull small text-ish content into the data bag. A
    /// re-inscription names its own type and size; a bare transfer carries
    /// no envelope, so the source metadata decides.
    async fn fetch_text_content(
        &self,
        ctx: &mut ParseContext,
        vout: usize,
        origin: &Outpoint,
        metadata: Option<&OrdfsMetadata>,
        api: &dyn IndexerApi,
    ) {
        let is_textish = |content_type: &str| {
            content_type.starts_with("text/")
                || content_type.starts_with("application/json")
                || content_type.starts_with("application/op-ns")
        };

        let own_file = ctx.txos[vout].data.get("insc").and_then(|entry| match &entry.data {
            IndexPayload::Inscription(insc) => Some(insc.file.clone()),
            _ => None,
        });

        let (content_type, size) = match (own_file, metadata) {
            (Some(file), _) => (file.content_type, Some(file.size)),
            (None, Some(meta)) => (
                meta.content_type.clone().unwrap_or_default(),
                meta.content_length,
            ),
            (None, None) => return,
        };

        if !is_textish(&content_type) || !size.is_some_and(|s| s <= MAX_EAGER_CONTENT) {
            return;
        }

        match api.ordfs_content(origin).await {
            Ok((bytes, _)) if bytes.len() as u64 <= MAX_EAGER_CONTENT => {
                if let Ok(text) = String::from_utf8(bytes) {
                    if let Some(entry) = ctx.txos[vout].data.get_mut(self.tag()) {
                        entry.content = Some(text);
                    }
                }
            }
            Ok(_) => {}
            Err(ApiError::NotFound) => {}
            Err(err) => warn!(%origin, "content fetch failed: {err}"),
        }
    }
}
