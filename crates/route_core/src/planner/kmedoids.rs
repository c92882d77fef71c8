//! K-medoids clustering on a duration matrix.
//!
//! PAM-style alternation: assign every point to its nearest medoid, then
//! re-center each cluster on the member minimizing intra-cluster cost.
//! Deterministic: initialization is farthest-point from the most central
//! point, all ties break on the lower index.

/// Cluster `n` points into `k` groups using the `cost[i][j]` matrix.
/// Returns clusters as sorted index lists; clusters are ordered by their
/// smallest member.
pub(crate) fn k_medoids(cost: &[Vec<f64>], k: usize, max_iter: usize) -> Vec<Vec<usize>> {
    let n = cost.len();
    if n == 0 || k == 0 {
        return Vec::new();
    }
    if k >= n {
        return (0..n).map(|i| vec![i]).collect();
    }

    // Seed: the most central point, then farthest-point selection.
    let mut medoids = Vec::with_capacity(k);
    let central = (0..n)
        .min_by(|&a, &b| {
            let sa: f64 = cost[a].iter().sum();
            let sb: f64 = cost[b].iter().sum();
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(0);
    medoids.push(central);
    while medoids.len() < k {
        let next = (0..n)
            .filter(|i| !medoids.contains(i))
            .max_by(|&a, &b| {
                let da = medoids.iter().map(|&m| cost[a][m]).fold(f64::INFINITY, f64::min);
                let db = medoids.iter().map(|&m| cost[b][m]).fold(f64::INFINITY, f64::min);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(0);
        medoids.push(next);
    }

    let mut assignment = vec![0usize; n];
    for _ in 0..max_iter {
        // Assign to nearest medoid.
        for i in 0..n {
            assignment[i] = (0..k)
                .min_by(|&a, &b| {
                    cost[i][medoids[a]]
                        .partial_cmp(&cost[i][medoids[b]])
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| medoids[a].cmp(&medoids[b]))
                })
                .unwrap_or(0);
        }

        // Re-center each cluster.
        let mut changed = false;
        for c in 0..k {
            let members: Vec<usize> = (0..n).filter(|&i| assignment[i] == c).collect();
            if members.is_empty() {
                continue;
            }
            let best = members
                .iter()
                .copied()
                .min_by(|&a, &b| {
                    let sa: f64 = members.iter().map(|&m| cost[a][m]).sum();
                    let sb: f64 = members.iter().map(|&m| cost[b][m]).sum();
                    sa.partial_cmp(&sb)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.cmp(&b))
                })
                .unwrap_or(medoids[c]);
            if best != medoids[c] {
                medoids[c] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut clusters: Vec<Vec<usize>> = vec![Vec::new(); k];
    for i in 0..n {
        clusters[assignment[i]].push(i);
    }
    clusters.retain(|c| !c.is_empty());
    clusters.sort_by_key(|c| c[0]);
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight groups: {0,1,2} and {3,4,5}, cheap inside, expensive across.
    fn two_group_cost() -> Vec<Vec<f64>> {
        let n = 6;
        let mut cost = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let same = (i < 3) == (j < 3);
                cost[i][j] = if same { 10.0 } else { 1000.0 };
            }
        }
        cost
    }

    #[test]
    fn splits_obvious_groups() {
        let clusters = k_medoids(&two_group_cost(), 2, 20);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], vec![0, 1, 2]);
        assert_eq!(clusters[1], vec![3, 4, 5]);
    }

    #[test]
    fn k_at_least_n_gives_singletons() {
        let clusters = k_medoids(&two_group_cost(), 9, 20);
        assert_eq!(clusters.len(), 6);
        assert!(clusters.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn empty_input() {
        assert!(k_medoids(&[], 2, 10).is_empty());
    }

    #[test]
    fn deterministic_across_runs() {
        let a = k_medoids(&two_group_cost(), 2, 20);
        let b = k_medoids(&two_group_cost(), 2, 20);
        assert_eq!(a, b);
    }
}
