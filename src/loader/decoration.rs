/*
 *  loader/decoration.rs
 *
 *  PgExt - Postgres extensions without the server
 *  (c) 2020-26 Stuart Hunter
 *
 *  Windows export name decoration candidates
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

//! Windows toolchains may export `foo` as `_foo`, `foo@N` or `_foo@N`, where
//! `N` is the stdcall argument byte count. An export has at most one of these
//! spellings, so the order below only has to be stable, not clever.

/// Largest stdcall argument byte count tried
pub const MAX_STDCALL_BYTES: usize = 64;

/// Stdcall argument sizes grow in 4 byte steps
pub const STDCALL_STEP: usize = 4;

/// Every spelling `lookup` tries on Windows, in order:
/// `name`, `_name`, `name@0`, `_name@0`, then `name@N`, `_name@N` for
/// N = 4, 8, ..., 64.
pub fn decorated_candidates(name: &str) -> Vec<String> {
    let mut candidates = Vec::with_capacity(candidate_count());
    candidates.push(name.to_string());
    candidates.push(format!("_{}", name));
    candidates.push(format!("{}@0", name));
    candidates.push(format!("_{}@0", name));
    for bytes in (STDCALL_STEP..=MAX_STDCALL_BYTES).step_by(STDCALL_STEP) {
        candidates.push(format!("{}@{}", name, bytes));
        candidates.push(format!("_{}@{}", name, bytes));
    }
    candidates
}

/// Length of every candidate list
pub const fn candidate_count() -> usize {
    4 + 2 * (MAX_STDCALL_BYTES / STDCALL_STEP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_order() {
        let candidates = decorated_candidates("uuid_generate_v4");
        assert_eq!(candidates.len(), 36);
        assert_eq!(candidates.len(), candidate_count());
        assert_eq!(&candidates[..6], &[
            "uuid_generate_v4",
            "_uuid_generate_v4",
            "uuid_generate_v4@0",
            "_uuid_generate_v4@0",
            "uuid_generate_v4@4",
            "_uuid_generate_v4@4",
        ]);
        assert_eq!(candidates[34], "uuid_generate_v4@64");
        assert_eq!(candidates[35], "_uuid_generate_v4@64");
    }

    #[test]
    fn test_candidates_are_deterministic_and_unique() {
        let first = decorated_candidates("errmsg");
        let second = decorated_candidates("errmsg");
        assert_eq!(first, second);

        let mut deduped = first.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), first.len());
    }

    #[test]
    fn test_no_sizes_past_limit() {
        let candidates = decorated_candidates("f");
        assert!(!candidates.iter().any(|c| c.ends_with("@68")));
        assert!(candidates.iter().all(|c| !c.ends_with("@2")));
    }
}
