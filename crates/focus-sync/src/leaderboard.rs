//! Leaderboard derivation.
//!
//! Ranking is a total order: score descending, then completed tasks
//! descending, then join order ascending. Join order is the participant's
//! position in the session's participant list.

use std::cmp::Reverse;

use focus_core::ids::UserId;
use focus_core::model::{LeaderboardEntry, Participant};

/// Rank `participants` (given in join order).
pub fn compute_leaderboard(participants: &[Participant]) -> Vec<LeaderboardEntry> {
    let mut ranked: Vec<(usize, &Participant)> = participants.iter().enumerate().collect();
    ranked.sort_by_key(|(join_order, p)| {
        (Reverse(p.effective_score()), Reverse(p.tasks_completed), *join_order)
    });

    ranked
        .into_iter()
        .zip(1u32..)
        .map(|((_, p), rank)| LeaderboardEntry {
            rank,
            user_id: p.user_id.clone(),
            user_name: p.user_name.clone(),
            avatar_url: p.avatar_url.clone(),
            score: p.effective_score(),
            tasks_completed: p.tasks_completed,
            focus_time: p.focus_time,
        })
        .collect()
}

/// One participant's metrics from a leaderboard source (live event or REST).
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MetricsUpdate {
    pub user_id: UserId,
    pub score: Option<i64>,
    pub tasks_completed: u32,
    pub focus_time: u32,
    pub user_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Fold metric rows into `participants`. Rows for unknown users are
/// skipped; returns how many rows matched.
///
/// The leaderboard only ranks current participants, so someone who left
/// before a final settlement update does not appear in it.
pub(crate) fn merge_metrics(
    participants: &mut [Participant],
    updates: impl IntoIterator<Item = MetricsUpdate>,
) -> usize {
    let mut matched = 0;
    for update in updates {
        let Some(p) = participants.iter_mut().find(|p| p.user_id == update.user_id) else {
            continue;
        };
        p.score = update.score;
        p.tasks_completed = update.tasks_completed;
        p.focus_time = update.focus_time;
        if let Some(name) = update.user_name {
            p.user_name = name;
        }
        if update.avatar_url.is_some() {
            p.avatar_url = update.avatar_url;
        }
        matched += 1;
    }
    matched
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn participant(id: &str, tasks: u32, focus: u32) -> Participant {
        let mut p = Participant::new(id, id.to_uppercase());
        p.tasks_completed = tasks;
        p.focus_time = focus;
        p
    }

    fn order(board: &[LeaderboardEntry]) -> Vec<&str> {
        board.iter().map(|e| e.user_id.as_str()).collect()
    }

    #[test]
    fn equal_score_breaks_on_tasks() {
        // A: 3×100 + 0 = 300, B: 2×100 + 100 = 300.
        let board = compute_leaderboard(&[participant("b", 2, 100), participant("a", 3, 0)]);
        assert_eq!(order(&board), vec!["a", "b"]);
        assert_eq!(board[0].score, 300);
        assert_eq!(board[1].score, 300);
        assert_eq!(board[0].rank, 1);
        assert_eq!(board[1].rank, 2);
    }

    #[test]
    fn full_tie_breaks_on_join_order() {
        let board = compute_leaderboard(&[participant("late", 1, 5), participant("later", 1, 5)]);
        assert_eq!(order(&board), vec!["late", "later"]);
    }

    #[test]
    fn authoritative_score_wins() {
        let mut boosted = participant("x", 0, 0);
        boosted.score = Some(10_000);
        let board = compute_leaderboard(&[participant("y", 5, 0), boosted]);
        assert_eq!(order(&board), vec!["x", "y"]);
        assert_eq!(board[0].score, 10_000);
    }

    #[test]
    fn merge_skips_unknown_users() {
        let mut ps = vec![participant("a", 0, 0)];
        let matched = merge_metrics(
            &mut ps,
            [
                MetricsUpdate {
                    user_id: "a".into(),
                    score: Some(42),
                    tasks_completed: 4,
                    focus_time: 2,
                    user_name: None,
                    avatar_url: Some("http://img/a.png".into()),
                },
                MetricsUpdate {
                    user_id: "ghost".into(),
                    score: None,
                    tasks_completed: 9,
                    focus_time: 9,
                    user_name: None,
                    avatar_url: None,
                },
            ],
        );
        assert_eq!(matched, 1);
        assert_eq!(ps[0].score, Some(42));
        assert_eq!(ps[0].tasks_completed, 4);
        assert_eq!(ps[0].user_name, "A");
        assert_eq!(ps[0].avatar_url.as_deref(), Some("http://img/a.png"));
    }

    proptest! {
        #[test]
        fn ranking_is_a_total_order(
            rows in proptest::collection::vec(
                (0u32..5, 0u32..300, proptest::option::of(0i64..800)),
                0..12,
            )
        ) {
            let participants: Vec<Participant> = rows
                .iter()
                .enumerate()
                .map(|(i, (tasks, focus, score))| {
                    let mut p = participant(&format!("u{i}"), *tasks, *focus);
                    p.score = *score;
                    p
                })
                .collect();

            let board = compute_leaderboard(&participants);
            prop_assert_eq!(&board, &compute_leaderboard(&participants));
            prop_assert_eq!(board.len(), participants.len());

            for pair in board.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                let join = |e: &LeaderboardEntry| {
                    participants.iter().position(|p| p.user_id == e.user_id)
                };
                let key_a = (Reverse(a.score), Reverse(a.tasks_completed), join(a));
                let key_b = (Reverse(b.score), Reverse(b.tasks_completed), join(b));
                prop_assert!(key_a < key_b);
                prop_assert_eq!(a.rank + 1, b.rank);
            }
        }
    }
}
