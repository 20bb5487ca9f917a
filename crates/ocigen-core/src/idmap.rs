//! ID-mapping arithmetic: host ID translation, GID availability domains,
//! and fitting requested mappings into the ranges the current user
//! namespace actually owns.

use std::io;
use std::path::PathBuf;

use ocigen_common::error::{OcigenError, Result};
use ocigen_common::types::IdMap;

use crate::provider::IdRangeQuery;

fn map_to_host(maps: &[IdMap], id: u32, kind: &'static str) -> Result<u32> {
    if maps.is_empty() {
        return Ok(id);
    }
    maps.iter()
        .find_map(|m| m.to_host(id))
        .ok_or(OcigenError::UnmappedId { kind, id })
}

/// Translates an in-container UID/GID pair to host IDs.
///
/// Empty tables are the identity mapping.
///
/// # Errors
///
/// Returns [`OcigenError::UnmappedId`] if a table does not cover the ID.
pub fn host_ids(uid_map: &[IdMap], gid_map: &[IdMap], uid: u32, gid: u32) -> Result<(u32, u32)> {
    Ok((
        map_to_host(uid_map, uid, "uid")?,
        map_to_host(gid_map, gid, "gid")?,
    ))
}

/// Computes which in-container GIDs can be assigned to the process.
///
/// # Errors
///
/// Returns [`OcigenError::IdMapUnavailable`] if a rootless context cannot
/// report its GID count.
pub fn gid_domain(configured: &[IdMap], rootless: bool, query: &dyn IdRangeQuery) -> Result<Vec<IdMap>> {
    if !configured.is_empty() {
        return Ok(configured.to_vec());
    }
    if rootless {
        let available = query
            .available_gids()
            .map_err(|source| OcigenError::IdMapUnavailable { source })?;
        return Ok(vec![IdMap::new(0, 0, available)]);
    }
    Ok(vec![IdMap::new(0, 0, u32::MAX)])
}

/// Supplemental GIDs split by whether the namespace can hold them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupFilter {
    /// GIDs inside the domain.
    pub kept: Vec<u32>,
    /// GIDs outside the domain.
    pub dropped: Vec<u32>,
}

/// Keeps the GIDs covered by `domain`; each dropped GID logs a warning.
#[must_use]
pub fn filter_supplemental_groups(sgids: &[u32], domain: &[IdMap]) -> GroupFilter {
    let mut filter = GroupFilter::default();
    for &gid in sgids {
        if domain.iter().any(|m| m.contains_container_id(gid)) {
            filter.kept.push(gid);
        } else {
            tracing::warn!(gid, "additional gid is not present in the user namespace, skip setting it");
            filter.dropped.push(gid);
        }
    }
    filter
}

/// Fits `mappings` into the ranges of `available`.
///
/// `available` is keyed by IDs of the current namespace (its
/// `container_id` column); a mapping's `host_id` is such an ID. Mappings
/// fully inside one available range are kept; others are split along
/// the available ranges they intersect, and uncovered parts are dropped.
#[must_use]
pub fn fit_mappings(mappings: &[IdMap], available: &[IdMap]) -> Vec<IdMap> {
    if available.is_empty() {
        return mappings.to_vec();
    }
    let mut ranges = available.to_vec();
    ranges.sort_by_key(|r| r.container_id);

    let mut fitted = Vec::with_capacity(mappings.len());
    for m in mappings {
        let start = u64::from(m.host_id);
        let end = start + u64::from(m.size);
        let inside_one = ranges.iter().any(|r| {
            let r_start = u64::from(r.container_id);
            start >= r_start && end <= r_start + u64::from(r.size)
        });
        if inside_one {
            fitted.push(*m);
            continue;
        }
        for r in &ranges {
            let r_start = u64::from(r.container_id);
            let lo = start.max(r_start);
            let hi = end.min(r_start + u64::from(r.size));
            if lo >= hi {
                continue;
            }
            let offset = lo - start;
            let part = (
                u32::try_from(u64::from(m.container_id) + offset),
                u32::try_from(lo),
                u32::try_from(hi - lo),
            );
            if let (Ok(container_id), Ok(host_id), Ok(size)) = part {
                fitted.push(IdMap::new(container_id, host_id, size));
            }
        }
        tracing::debug!(?m, "split mapping along available ranges");
    }
    fitted
}

/// Parses `/proc/<pid>/{uid,gid}_map` contents.
///
/// # Errors
///
/// Returns `InvalidData` on malformed lines.
pub fn parse_id_map(contents: &str) -> io::Result<Vec<IdMap>> {
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let fields: Vec<u32> = line
                .split_whitespace()
                .map(str::parse)
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            match fields.as_slice() {
                [inside, outside, count] => Ok(IdMap::new(*inside, *outside, *count)),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("malformed id map line: {line:?}"),
                )),
            }
        })
        .collect()
}

/// [`IdRangeQuery`] backed by the calling process's `/proc` mapping files.
#[derive(Debug, Clone)]
pub struct ProcIdRangeQuery {
    proc_self: PathBuf,
}

impl Default for ProcIdRangeQuery {
    fn default() -> Self {
        Self::new("/proc/self")
    }
}

impl ProcIdRangeQuery {
    /// Creates a query reading `uid_map`/`gid_map` from `proc_self`.
    #[must_use]
    pub fn new(proc_self: impl Into<PathBuf>) -> Self {
        Self {
            proc_self: proc_self.into(),
        }
    }

    fn read(&self, name: &str) -> io::Result<Vec<IdMap>> {
        parse_id_map(&std::fs::read_to_string(self.proc_self.join(name))?)
    }
}

impl IdRangeQuery for ProcIdRangeQuery {
    fn available_maps(&self) -> io::Result<(Vec<IdMap>, Vec<IdMap>)> {
        Ok((self.read("uid_map")?, self.read("gid_map")?))
    }

    fn available_gids(&self) -> io::Result<u32> {
        let total: u64 = self.read("gid_map")?.iter().map(|m| u64::from(m.size)).sum();
        Ok(u32::try_from(total).unwrap_or(u32::MAX))
    }
}
