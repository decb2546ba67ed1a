//! C1 — ResourceAllocator: an in-memory pool of ports, container names and
//! CPU/memory quotas, shared by every worktree in one exploration.
//!
//! Grounded on the resource-pool bookkeeping in the host crate's
//! `cook::execution::mapreduce::resources::pool` (a `tokio::sync::Mutex`-guarded
//! collection with metrics), generalised from a generic resource pool to the
//! port/name allocation table.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::Mutex;

use crate::error::{ExplorationError, Result};
use crate::model::AllocatedResources;

const DEFAULT_PORT_START: u16 = 3000;
const DEFAULT_PORT_END: u16 = 3100;

#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub exploration_id: String,
    pub worktree_index: u32,
    pub cpu_limit: String,
    pub memory_limit: String,
}

struct Inner {
    next_port_candidates: Vec<u16>,
    allocations: HashMap<(String, u32), AllocatedResources>,
    used_ports: std::collections::HashSet<u16>,
}

pub struct ResourceAllocator {
    start: u16,
    end: u16,
    inner: Mutex<Inner>,
}

impl ResourceAllocator {
    pub fn new(start: u16, end: u16) -> Self {
        let candidates: Vec<u16> = (start..=end).collect();
        Self {
            start,
            end,
            inner: Mutex::new(Inner {
                next_port_candidates: candidates,
                allocations: HashMap::new(),
                used_ports: std::collections::HashSet::new(),
            }),
        }
    }

    pub fn with_default_range() -> Self {
        Self::new(DEFAULT_PORT_START, DEFAULT_PORT_END)
    }

    pub fn validate_cpu_limit(cpu_limit: &str) -> Result<f64> {
        let value: f64 = cpu_limit
            .parse()
            .map_err(|_| ExplorationError::Validation(format!("invalid cpu_limit: {cpu_limit}")))?;
        if value <= 0.0 || value > 64.0 {
            return Err(ExplorationError::Validation(format!(
                "cpu_limit must be in (0, 64], got {value}"
            )));
        }
        Ok(value)
    }

    pub fn validate_memory_limit(memory_limit: &str) -> Result<()> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"^(\d+)([mg])$").unwrap());
        let caps = re.captures(memory_limit).ok_or_else(|| {
            ExplorationError::Validation(format!(
                "memory_limit must match ^\\d+[mg]$, got {memory_limit}"
            ))
        })?;
        let n: u64 = caps[1].parse().unwrap();
        match &caps[2] {
            "m" => {
                if !(256..=32768).contains(&n) {
                    return Err(ExplorationError::Validation(format!(
                        "memory_limit in MB must be in [256, 32768], got {n}"
                    )));
                }
            }
            "g" => {
                if !(1..=32).contains(&n) {
                    return Err(ExplorationError::Validation(format!(
                        "memory_limit in GB must be in [1, 32], got {n}"
                    )));
                }
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    pub async fn allocate(&self, request: &AllocationRequest) -> Result<AllocatedResources> {
        Self::validate_cpu_limit(&request.cpu_limit)?;
        Self::validate_memory_limit(&request.memory_limit)?;

        let mut inner = self.inner.lock().await;
        let port = inner
            .next_port_candidates
            .iter()
            .find(|p| !inner.used_ports.contains(p))
            .copied()
            .ok_or_else(|| {
                ExplorationError::ResourceExhaustion(format!(
                    "no free ports in range [{}, {}]",
                    self.start, self.end
                ))
            })?;

        inner.used_ports.insert(port);

        let resources = AllocatedResources {
            container_name: format!("exploration-{}-{}", request.exploration_id, request.worktree_index),
            port: Some(port),
            cpu_limit: request.cpu_limit.clone(),
            memory_limit: request.memory_limit.clone(),
        };

        inner.allocations.insert(
            (request.exploration_id.clone(), request.worktree_index),
            resources.clone(),
        );

        Ok(resources)
    }

    /// Sequential allocation with rollback of any ports taken during this
    /// call if a later request fails.
    pub async fn allocate_multiple(
        &self,
        requests: &[AllocationRequest],
    ) -> Result<Vec<AllocatedResources>> {
        let mut allocated = Vec::with_capacity(requests.len());
        for request in requests {
            match self.allocate(request).await {
                Ok(resources) => allocated.push(resources),
                Err(err) => {
                    for request in requests.iter().take(allocated.len()) {
                        self.release(&request.exploration_id, request.worktree_index)
                            .await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(allocated)
    }

    pub async fn release(&self, exploration_id: &str, worktree_index: u32) {
        let mut inner = self.inner.lock().await;
        if let Some(resources) = inner
            .allocations
            .remove(&(exploration_id.to_string(), worktree_index))
        {
            if let Some(port) = resources.port {
                inner.used_ports.remove(&port);
            }
        }
    }

    pub async fn release_all(&self, exploration_id: &str) {
        let mut inner = self.inner.lock().await;
        let keys: Vec<(String, u32)> = inner
            .allocations
            .keys()
            .filter(|(id, _)| id == exploration_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(resources) = inner.allocations.remove(&key) {
                if let Some(port) = resources.port {
                    inner.used_ports.remove(&port);
                }
            }
        }
    }

    pub async fn can_allocate(&self, n: usize) -> bool {
        let inner = self.inner.lock().await;
        let free = inner
            .next_port_candidates
            .iter()
            .filter(|p| !inner.used_ports.contains(p))
            .count();
        free >= n
    }

    pub async fn available_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .next_port_candidates
            .iter()
            .filter(|p| !inner.used_ports.contains(p))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(exploration_id: &str, idx: u32) -> AllocationRequest {
        AllocationRequest {
            exploration_id: exploration_id.to_string(),
            worktree_index: idx,
            cpu_limit: "1".to_string(),
            memory_limit: "512m".to_string(),
        }
    }

    #[tokio::test]
    async fn allocates_lowest_free_port_first() {
        let alloc = ResourceAllocator::new(3000, 3002);
        let a = alloc.allocate(&req("e1", 1)).await.unwrap();
        let b = alloc.allocate(&req("e1", 2)).await.unwrap();
        assert_eq!(a.port, Some(3000));
        assert_eq!(b.port, Some(3001));
    }

    #[tokio::test]
    async fn exhausts_after_range_size() {
        let alloc = ResourceAllocator::new(3000, 3001);
        alloc.allocate(&req("e1", 1)).await.unwrap();
        alloc.allocate(&req("e1", 2)).await.unwrap();
        let err = alloc.allocate(&req("e1", 3)).await.unwrap_err();
        assert!(matches!(err, ExplorationError::ResourceExhaustion(_)));
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let alloc = ResourceAllocator::new(3000, 3000);
        alloc.allocate(&req("e1", 1)).await.unwrap();
        alloc.release("e1", 1).await;
        alloc.release("e1", 1).await;
        assert_eq!(alloc.available_count().await, 1);
    }

    #[tokio::test]
    async fn allocate_multiple_rolls_back_on_failure() {
        let alloc = ResourceAllocator::new(3000, 3001);
        let requests = vec![req("e1", 1), req("e1", 2), req("e1", 3)];
        let err = alloc.allocate_multiple(&requests).await.unwrap_err();
        assert!(matches!(err, ExplorationError::ResourceExhaustion(_)));
        assert_eq!(alloc.available_count().await, 2);
    }

    #[test]
    fn validates_memory_limit_bounds() {
        assert!(ResourceAllocator::validate_memory_limit("512m").is_ok());
        assert!(ResourceAllocator::validate_memory_limit("2g").is_ok());
        assert!(ResourceAllocator::validate_memory_limit("128m").is_err());
        assert!(ResourceAllocator::validate_memory_limit("64g").is_err());
        assert!(ResourceAllocator::validate_memory_limit("2x").is_err());
    }

    #[test]
    fn validates_cpu_limit_bounds() {
        assert!(ResourceAllocator::validate_cpu_limit("1.5").is_ok());
        assert!(ResourceAllocator::validate_cpu_limit("64").is_ok());
        assert!(ResourceAllocator::validate_cpu_limit("0").is_err());
        assert!(ResourceAllocator::validate_cpu_limit("65").is_err());
    }
}
