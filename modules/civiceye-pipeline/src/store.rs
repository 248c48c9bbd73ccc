//! The incident store: cell-keyed access to the shared incident set.
//! The map is partitioned into geohash cells sized from the dedup
//! radius; a unit of work only needs exclusive access to its own cell
//! block, so independent reports in distant cells never contend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use geohash::Coord;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use civiceye_common::{CivicEyeError, GeoPoint, Incident, IncidentStatus};

/// Geohash string identifying one spatial cell.
pub type CellKey = String;

/// Minimum cell side in meters per geohash precision (1-9), worst case
/// at the equator. Picking the finest precision whose side still
/// covers the dedup radius keeps every radius-qualifying candidate
/// inside the 3x3 neighbor block.
const MIN_CELL_SIDE_M: [f64; 9] = [
    5_000_000.0, // 1
    625_000.0,   // 2
    156_000.0,   // 3
    19_500.0,    // 4
    4_890.0,     // 5
    610.0,       // 6
    153.0,       // 7
    19.1,        // 8
    4.77,        // 9
];

/// Finest geohash precision whose cell side is at least `radius_m`.
pub fn precision_for_radius(radius_m: f64) -> usize {
    let mut precision = 1;
    for (i, side) in MIN_CELL_SIDE_M.iter().enumerate() {
        if *side >= radius_m {
            precision = i + 1;
        } else {
            break;
        }
    }
    precision
}

/// Cell key for a location at the given precision.
pub fn cell_for(location: &GeoPoint, precision: usize) -> Result<CellKey, CivicEyeError> {
    geohash::encode(
        Coord {
            x: location.lng,
            y: location.lat,
        },
        precision,
    )
    .map_err(|e| CivicEyeError::Store(format!("geohash encode failed: {e}")))
}

/// The location's cell plus its eight neighbors, sorted and deduplicated.
/// Sorted order doubles as the lock-acquisition order.
pub fn cell_block(location: &GeoPoint, precision: usize) -> Result<Vec<CellKey>, CivicEyeError> {
    let home = cell_for(location, precision)?;
    let neighbors = geohash::neighbors(&home)
        .map_err(|e| CivicEyeError::Store(format!("geohash neighbors failed: {e}")))?;
    let mut cells = vec![
        home,
        neighbors.n,
        neighbors.ne,
        neighbors.e,
        neighbors.se,
        neighbors.s,
        neighbors.sw,
        neighbors.w,
        neighbors.nw,
    ];
    cells.sort_unstable();
    cells.dedup();
    Ok(cells)
}

/// The single write a dedup decision produces under its cell lease.
pub enum CellWrite {
    /// Replace the stored incident with the same id.
    Update(Incident),
    /// Insert a fresh incident into its home cell.
    Create { cell: CellKey, incident: Incident },
}

/// Key-value access keyed by spatial cell. `read_modify` is the atomic
/// update-or-create: the decide closure sees a consistent snapshot of
/// every candidate in the cell block, and its write applies under the
/// same exclusive lease.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn read_modify(
        &self,
        cells: &[CellKey],
        decide: Box<dyn for<'a> FnOnce(&'a [Incident]) -> CellWrite + Send>,
    ) -> Result<Incident, CivicEyeError>;

    async fn get(&self, id: Uuid) -> Result<Option<Incident>, CivicEyeError>;

    /// Status transition from the downstream review surface.
    async fn set_status(
        &self,
        id: Uuid,
        status: IncidentStatus,
    ) -> Result<Incident, CivicEyeError>;

    /// All non-resolved incidents, for triage ranking.
    async fn active_incidents(&self) -> Result<Vec<Incident>, CivicEyeError>;
}

/// In-memory store: an outer map of cell -> incidents with one async
/// lock per cell. Block leases take cell locks in sorted key order, so
/// overlapping blocks cannot deadlock.
#[derive(Default)]
pub struct MemoryIncidentStore {
    cells: RwLock<HashMap<CellKey, Arc<Mutex<Vec<Incident>>>>>,
    index: RwLock<HashMap<Uuid, CellKey>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every cell in the block, creating empty cells as needed.
    /// `cells` must already be sorted; the guards are returned in that
    /// order.
    async fn lease(&self, cells: &[CellKey]) -> Vec<(CellKey, OwnedMutexGuard<Vec<Incident>>)> {
        let mut arcs = Vec::with_capacity(cells.len());
        {
            let mut map = self.cells.write().await;
            for key in cells {
                let cell = map.entry(key.clone()).or_default();
                arcs.push((key.clone(), Arc::clone(cell)));
            }
        }
        let mut guards = Vec::with_capacity(arcs.len());
        for (key, arc) in arcs {
            let guard = arc.lock_owned().await;
            guards.push((key, guard));
        }
        guards
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn read_modify(
        &self,
        cells: &[CellKey],
        decide: Box<dyn for<'a> FnOnce(&'a [Incident]) -> CellWrite + Send>,
    ) -> Result<Incident, CivicEyeError> {
        let mut sorted: Vec<CellKey> = cells.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut guards = self.lease(&sorted).await;

        let snapshot: Vec<Incident> = guards
            .iter()
            .flat_map(|(_, g)| g.iter().cloned())
            .collect();

        match decide(&snapshot) {
            CellWrite::Update(updated) => {
                for (_, guard) in guards.iter_mut() {
                    if let Some(slot) = guard.iter_mut().find(|i| i.id == updated.id) {
                        *slot = updated.clone();
                        return Ok(updated);
                    }
                }
                Err(CivicEyeError::Store(format!(
                    "update target {} not in leased cells",
                    updated.id
                )))
            }
            CellWrite::Create { cell, incident } => {
                let (_, guard) = guards
                    .iter_mut()
                    .find(|(key, _)| *key == cell)
                    .ok_or_else(|| {
                        CivicEyeError::Store(format!("create cell {cell} not in leased block"))
                    })?;
                guard.push(incident.clone());
                self.index.write().await.insert(incident.id, cell);
                Ok(incident)
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Incident>, CivicEyeError> {
        let cell = match self.index.read().await.get(&id) {
            Some(cell) => cell.clone(),
            None => return Ok(None),
        };
        let arc = match self.cells.read().await.get(&cell) {
            Some(arc) => Arc::clone(arc),
            None => return Ok(None),
        };
        let guard = arc.lock().await;
        Ok(guard.iter().find(|i| i.id == id).cloned())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: IncidentStatus,
    ) -> Result<Incident, CivicEyeError> {
        let cell = self
            .index
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CivicEyeError::Store(format!("unknown incident {id}")))?;
        let arc = self
            .cells
            .read()
            .await
            .get(&cell)
            .map(Arc::clone)
            .ok_or_else(|| CivicEyeError::Store(format!("missing cell {cell}")))?;
        let mut guard = arc.lock().await;
        let incident = guard
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| CivicEyeError::Store(format!("unknown incident {id}")))?;
        incident.status = status;
        Ok(incident.clone())
    }

    async fn active_incidents(&self) -> Result<Vec<Incident>, CivicEyeError> {
        let arcs: Vec<Arc<Mutex<Vec<Incident>>>> =
            self.cells.read().await.values().map(Arc::clone).collect();
        let mut out = Vec::new();
        for arc in arcs {
            let guard = arc.lock().await;
            out.extend(
                guard
                    .iter()
                    .filter(|i| i.status != IncidentStatus::Resolved)
                    .cloned(),
            );
        }
        Ok(out)
    }
}
