//! Minimum-cost assignment on a rectangular cost matrix.
//!
//! Hungarian algorithm in the potentials formulation, O(n²·m) with n ≤ m.
//! Works on rectangular inputs directly, so no padding to square and no
//! phantom matches against padded entries.

use crate::error::EngineError;

/// Solve the assignment problem for `cost[row][col]`.
///
/// Returns the assigned column per row. When there are more rows than
/// columns the surplus rows come back `None`; every column is used at most
/// once either way.
pub fn solve(cost: &[Vec<f64>]) -> Result<Vec<Option<usize>>, EngineError> {
    let n = cost.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let m = cost[0].len();
    if cost.iter().any(|row| row.len() != m) {
        return Err(EngineError::AssignmentInfeasible("ragged cost matrix".into()));
    }
    if m == 0 {
        return Ok(vec![None; n]);
    }
    if cost.iter().flatten().any(|c| !c.is_finite()) {
        return Err(EngineError::AssignmentInfeasible("non-finite cost entry".into()));
    }

    if n <= m {
        solve_wide(cost, n, m)
    } else {
        // transpose so rows <= cols, then invert the mapping
        let transposed: Vec<Vec<f64>> =
            (0..m).map(|j| (0..n).map(|i| cost[i][j]).collect()).collect();
        let by_col = solve_wide(&transposed, m, n)?;
        let mut by_row = vec![None; n];
        for (col, row) in by_col.into_iter().enumerate() {
            if let Some(row) = row {
                by_row[row] = Some(col);
            }
        }
        Ok(by_row)
    }
}

/// Core solver, requires `n <= m`. Indices are 1-based internally; slot 0 is
/// the algorithm's scratch column.
fn solve_wide(cost: &[Vec<f64>], n: usize, m: usize) -> Result<Vec<Option<usize>>, EngineError> {
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    // p[j] = row currently assigned to column j (0 = unassigned)
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;

            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }

            if !delta.is_finite() {
                // unreachable with finite costs; a well-formed matrix always
                // admits a perfect matching of the smaller side
                return Err(EngineError::AssignmentInfeasible(
                    "no augmenting path on finite matrix".into(),
                ));
            }

            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }

            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        // augment along the alternating path
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![None; n];
    for j in 1..=m {
        if p[j] != 0 {
            assignment[p[j] - 1] = Some(j - 1);
        }
    }
    Ok(assignment)
}
