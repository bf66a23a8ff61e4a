use sha2::{Digest, Sha256};

/// Something a request can be routed to.
pub trait RouteTarget {
    fn route_id(&self) -> u64;
    fn pending(&self) -> usize;
}

fn hrw_score(key: &[u8], target_id: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(target_id.to_be_bytes());
    let digest = hasher.finalize();
    // take first 8 bytes as u64
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&digest[0..8]);
    u64::from_be_bytes(arr)
}

/// Rendezvous hashing: the same key always lands on the same target for a
/// fixed target set, and removing a target only moves its own keys.
pub fn pick_by_key<'a, T: RouteTarget>(targets: &'a [T], key: &[u8]) -> Option<&'a T> {
    let mut best = None::<&T>;
    let mut best_score = 0u64;
    for target in targets {
        let score = hrw_score(key, target.route_id());
        if best.is_none() || score > best_score {
            best_score = score;
            best = Some(target);
        }
    }
    best
}

/// Target with the fewest outstanding requests; ties go to the lowest index.
pub fn pick_least_pending<T: RouteTarget>(targets: &[T]) -> Option<&T> {
    let mut best = None::<&T>;
    let mut best_pending = usize::MAX;
    for target in targets {
        let pending = target.pending();
        if pending < best_pending {
            best_pending = pending;
            best = Some(target);
        }
    }
    best
}
