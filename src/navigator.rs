//! Path navigator
//!
//! Owns the current remote directory and the breadcrumb trail leading to it.
//! Transitions are computed by a pure reducer over an immutable [`NavState`]
//! snapshot; [`PathNavigator`] only swaps in the new snapshot on success.
//! Nothing here performs I/O: reacting to a path change is the caller's job.

use serde::Serialize;

use crate::error::NavigationError;
use crate::path;

pub const DEFAULT_ROOT_LABEL: &str = "/";

/// One breadcrumb: a display label and the path it navigates to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub name: String,
    pub path: String,
}

/// Navigation action applied by [`reduce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavAction {
    Descend(String),
    Ascend,
    JumpTo(usize),
    Reset,
}

/// Immutable navigation snapshot.
///
/// Invariant: `trail` is never empty, `trail[0]` is the root, every entry
/// extends the previous one by exactly one segment, and the last entry's
/// path equals `current`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavState {
    current: String,
    trail: Vec<Breadcrumb>,
}

impl NavState {
    pub fn root(root_label: &str) -> Self {
        Self {
            current: path::ROOT.to_string(),
            trail: vec![Breadcrumb {
                name: root_label.to_string(),
                path: path::ROOT.to_string(),
            }],
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn trail(&self) -> &[Breadcrumb] {
        &self.trail
    }

    pub fn is_root(&self) -> bool {
        self.current.is_empty()
    }

    /// Check the trail invariant. Used by tests and debug assertions.
    pub fn is_consistent(&self) -> bool {
        let Some(first) = self.trail.first() else {
            return false;
        };
        if !first.path.is_empty() {
            return false;
        }
        for pair in self.trail.windows(2) {
            if pair[1].path != path::join(&pair[0].path, &pair[1].name) {
                return false;
            }
        }
        self.trail.last().map(|b| b.path.as_str()) == Some(self.current.as_str())
    }
}

/// Compute the snapshot that results from applying `action` to `state`.
pub fn reduce(state: &NavState, action: NavAction) -> Result<NavState, NavigationError> {
    match action {
        NavAction::Descend(segment) => {
            path::validate_segment(&segment).map_err(NavigationError::InvalidSegment)?;
            let new_path = path::join(&state.current, &segment);
            let mut trail = state.trail.clone();
            trail.push(Breadcrumb {
                name: segment,
                path: new_path.clone(),
            });
            Ok(NavState {
                current: new_path,
                trail,
            })
        }
        NavAction::Ascend => {
            if state.is_root() || state.trail.len() <= 1 {
                return Ok(state.clone());
            }
            let mut trail = state.trail.clone();
            trail.pop();
            Ok(NavState {
                current: path::parent(&state.current),
                trail,
            })
        }
        NavAction::JumpTo(index) => {
            let target = state.trail.get(index).ok_or(NavigationError::InvalidIndex {
                index,
                len: state.trail.len(),
            })?;
            Ok(NavState {
                current: target.path.clone(),
                trail: state.trail[..=index].to_vec(),
            })
        }
        NavAction::Reset => {
            let label = state
                .trail
                .first()
                .map(|b| b.name.as_str())
                .unwrap_or(DEFAULT_ROOT_LABEL);
            Ok(NavState::root(label))
        }
    }
}

/// Stateful wrapper owning the current [`NavState`].
#[derive(Debug, Clone)]
pub struct PathNavigator {
    state: NavState,
}

impl Default for PathNavigator {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT_LABEL)
    }
}

impl PathNavigator {
    pub fn new(root_label: &str) -> Self {
        Self {
            state: NavState::root(root_label),
        }
    }

    pub fn state(&self) -> &NavState {
        &self.state
    }

    pub fn current_path(&self) -> &str {
        self.state.current()
    }

    pub fn trail(&self) -> &[Breadcrumb] {
        self.state.trail()
    }

    /// Apply an action. Returns true when the current path changed.
    pub fn dispatch(&mut self, action: NavAction) -> Result<bool, NavigationError> {
        let next = reduce(&self.state, action)?;
        debug_assert!(next.is_consistent());
        let changed = next.current != self.state.current;
        self.state = next;
        Ok(changed)
    }

    pub fn descend(&mut self, segment: &str) -> Result<bool, NavigationError> {
        self.dispatch(NavAction::Descend(segment.to_string()))
    }

    pub fn ascend(&mut self) -> bool {
        // Ascend cannot fail
        self.dispatch(NavAction::Ascend).unwrap_or(false)
    }

    pub fn jump_to(&mut self, index: usize) -> Result<bool, NavigationError> {
        self.dispatch(NavAction::JumpTo(index))
    }

    pub fn reset(&mut self) -> bool {
        self.dispatch(NavAction::Reset).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_root() {
        let nav = PathNavigator::default();
        assert_eq!(nav.current_path(), "");
        assert_eq!(nav.trail().len(), 1);
        assert!(nav.state().is_consistent());
    }

    #[test]
    fn test_descend_extends_path_and_trail() {
        let mut nav = PathNavigator::default();
        assert!(nav.descend("docs").unwrap());
        assert!(nav.descend("2024").unwrap());
        assert_eq!(nav.current_path(), "docs/2024");
        let paths: Vec<&str> = nav.trail().iter().map(|b| b.path.as_str()).collect();
        assert_eq!(paths, vec!["", "docs", "docs/2024"]);
        assert_eq!(nav.trail()[2].name, "2024");
    }

    #[test]
    fn test_descend_rejects_invalid_segments() {
        let mut nav = PathNavigator::default();
        for bad in ["", "a/b", ".."] {
            assert!(matches!(nav.descend(bad), Err(NavigationError::InvalidSegment(_))));
        }
        assert_eq!(nav.current_path(), "");
    }

    #[test]
    fn test_ascend_at_root_is_noop() {
        let mut nav = PathNavigator::new("Home");
        let before = nav.state().clone();
        assert!(!nav.ascend());
        assert_eq!(nav.state(), &before);
    }

    #[test]
    fn test_ascend_pops_one_level() {
        let mut nav = PathNavigator::default();
        nav.descend("a").unwrap();
        nav.descend("b").unwrap();
        assert!(nav.ascend());
        assert_eq!(nav.current_path(), "a");
        assert_eq!(nav.trail().len(), 2);
    }

    #[test]
    fn test_jump_to_truncates_trail() {
        let mut nav = PathNavigator::default();
        for seg in ["a", "b", "c"] {
            nav.descend(seg).unwrap();
        }
        assert!(nav.jump_to(1).unwrap());
        assert_eq!(nav.current_path(), "a");
        assert_eq!(nav.trail().len(), 2);
    }

    #[test]
    fn test_jump_to_out_of_bounds() {
        let mut nav = PathNavigator::default();
        nav.descend("a").unwrap();
        assert_eq!(
            nav.jump_to(2),
            Err(NavigationError::InvalidIndex { index: 2, len: 2 })
        );
        assert_eq!(nav.current_path(), "a");
    }

    #[test]
    fn test_jump_round_trip_restores_path() {
        let mut nav = PathNavigator::default();
        for seg in ["x", "y", "z"] {
            nav.descend(seg).unwrap();
        }
        nav.jump_to(2).unwrap();
        let after_jump = nav.current_path().to_string();
        let last = nav.trail().len() - 1;
        assert!(!nav.jump_to(last).unwrap());
        assert_eq!(nav.current_path(), after_jump);
    }

    #[test]
    fn test_reset_keeps_root_label() {
        let mut nav = PathNavigator::new("Home");
        nav.descend("a").unwrap();
        assert!(nav.reset());
        assert_eq!(nav.trail()[0].name, "Home");
        assert_eq!(nav.current_path(), "");
    }

    #[test]
    fn test_invariant_holds_for_action_sequences() {
        // Small deterministic LCG so the sequence is reproducible.
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };
        let names = ["a", "b", "docs", "..", "", "x/y"];
        let mut nav = PathNavigator::default();
        for _ in 0..500 {
            let _ = match next() % 3 {
                0 => nav.descend(names[next() % names.len()]).map(|_| ()),
                1 => {
                    nav.ascend();
                    Ok(())
                }
                _ => {
                    let idx = next() % (nav.trail().len() + 1);
                    nav.jump_to(idx).map(|_| ())
                }
            };
            assert!(nav.state().is_consistent(), "broken state: {:?}", nav.state());
        }
    }
}
