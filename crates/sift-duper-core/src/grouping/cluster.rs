use rayon::prelude::*;

/// Greedy single-linkage split.
///
/// The first remaining item becomes the pivot; every other remaining item that matches the
/// pivot joins its cluster, the rest wait for the next pivot. Stops once fewer than two items
/// remain. Only clusters with at least two members are returned. Members of a cluster are
/// similar to its pivot, not necessarily to each other. Input order is preserved inside each
/// cluster, pivot first.
pub fn split_by_pivot<T, F>(items: Vec<T>, is_match: F) -> Vec<Vec<T>>
where
    T: Send + Sync,
    F: Fn(&T, &T) -> bool + Sync,
{
    let mut clusters = Vec::new();
    let mut remaining = items;

    while remaining.len() >= 2 {
        let mut rest = remaining.into_iter();
        let Some(pivot) = rest.next() else {
            break;
        };
        let candidates: Vec<T> = rest.collect();
        let (matched, unmatched): (Vec<T>, Vec<T>) = candidates
            .into_par_iter()
            .partition(|candidate| is_match(&pivot, candidate));

        if !matched.is_empty() {
            let mut cluster = Vec::with_capacity(matched.len() + 1);
            cluster.push(pivot);
            cluster.extend(matched);
            clusters.push(cluster);
        }
        remaining = unmatched;
    }

    clusters
}
