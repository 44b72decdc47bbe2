//! Hash-join execution and self-join tagging helpers.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::instance::DynJoin;
use super::{Join, Transform};
use crate::engine::PipelineContext;
use crate::error::{BoxedError, Result};
use crate::pipe::{DataPipe, PipelineItem};

/// Which rows a join emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum JoinKind {
    /// Only matched pairs.
    #[default]
    Inner,
    /// Matched pairs plus unmatched left rows (via the left fallback).
    LeftOuter,
    /// Matched pairs plus unmatched right rows (via the right fallback).
    RightOuter,
    /// Matched pairs plus unmatched rows from both sides.
    FullOuter,
}

impl JoinKind {
    /// Returns whether unmatched left rows are emitted.
    pub fn keeps_left(&self) -> bool {
        matches!(self, Self::LeftOuter | Self::FullOuter)
    }

    /// Returns whether unmatched right rows are emitted.
    pub fn keeps_right(&self) -> bool {
        matches!(self, Self::RightOuter | Self::FullOuter)
    }
}

/// Left-side wrapper for self-joins.
///
/// Joining a type against itself needs distinct wire types so the engine can
/// route rows to the correct side; wrap each side with [`TagLeft`] /
/// [`TagRight`] transforms and unwrap in the join's selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeftTagged<T>(pub T);

/// Right-side wrapper for self-joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RightTagged<T>(pub T);

/// Transform wrapping items into [`LeftTagged`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TagLeft<T>(std::marker::PhantomData<fn() -> T>);

impl<T> TagLeft<T> {
    /// Creates the tagging transform.
    pub fn new() -> Self {
        Self(std::marker::PhantomData)
    }
}

#[async_trait]
impl<T: PipelineItem> Transform for TagLeft<T> {
    type Input = T;
    type Output = LeftTagged<T>;

    async fn execute_item(
        &self,
        item: T,
        _ctx: &PipelineContext,
    ) -> Result<LeftTagged<T>, BoxedError> {
        Ok(LeftTagged(item))
    }
}

/// Transform wrapping items into [`RightTagged`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TagRight<T>(std::marker::PhantomData<fn() -> T>);

impl<T> TagRight<T> {
    /// Creates the tagging transform.
    pub fn new() -> Self {
        Self(std::marker::PhantomData)
    }
}

#[async_trait]
impl<T: PipelineItem> Transform for TagRight<T> {
    type Input = T;
    type Output = RightTagged<T>;

    async fn execute_item(
        &self,
        item: T,
        _ctx: &PipelineContext,
    ) -> Result<RightTagged<T>, BoxedError> {
        Ok(RightTagged(item))
    }
}

/// Hash-join executor wrapping a typed [`Join`].
///
/// Both inputs are drained before any output is produced; the joined rows
/// are emitted in left-input order, followed by unmatched right rows for
/// right/full outer joins.
pub(crate) struct JoinAdapter<J> {
    join: J,
    kind: JoinKind,
}

impl<J> JoinAdapter<J> {
    pub(crate) fn new(join: J, kind: JoinKind) -> Self {
        Self { join, kind }
    }
}

#[async_trait]
impl<J: Join> DynJoin for JoinAdapter<J> {
    async fn execute(
        &mut self,
        left: DataPipe,
        right: DataPipe,
        ctx: &PipelineContext,
    ) -> Result<DataPipe> {
        let left_rows: Vec<J::Left> = left.into_typed()?.collect(ctx).await?;
        let right_rows: Vec<J::Right> = right.into_typed()?.collect(ctx).await?;

        let mut right_index: HashMap<J::Key, Vec<usize>> = HashMap::new();
        for (idx, row) in right_rows.iter().enumerate() {
            right_index
                .entry(self.join.right_key(row))
                .or_default()
                .push(idx);
        }

        let mut right_matched = vec![false; right_rows.len()];
        let mut output: Vec<J::Output> = Vec::new();

        for left_row in &left_rows {
            let key = self.join.left_key(left_row);
            match right_index.get(&key) {
                Some(matches) => {
                    for &idx in matches {
                        right_matched[idx] = true;
                        output.push(self.join.join(left_row, &right_rows[idx]));
                    }
                }
                None => {
                    if self.kind.keeps_left()
                        && let Some(row) = self.join.left_fallback(left_row)
                    {
                        output.push(row);
                    }
                }
            }
        }

        if self.kind.keeps_right() {
            for (idx, row) in right_rows.iter().enumerate() {
                if !right_matched[idx]
                    && let Some(out) = self.join.right_fallback(row)
                {
                    output.push(out);
                }
            }
        }

        Ok(DataPipe::from_items(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NumberWords;

    impl Join for NumberWords {
        type Left = u32;
        type Right = (u32, String);
        type Key = u32;
        type Output = String;

        fn left_key(&self, left: &u32) -> u32 {
            *left
        }

        fn right_key(&self, right: &(u32, String)) -> u32 {
            right.0
        }

        fn join(&self, left: &u32, right: &(u32, String)) -> String {
            format!("{left}={}", right.1)
        }

        fn left_fallback(&self, left: &u32) -> Option<String> {
            Some(format!("{left}=?"))
        }
    }

    fn right_rows() -> Vec<(u32, String)> {
        vec![(1, "one".into()), (3, "three".into())]
    }

    #[tokio::test]
    async fn test_inner_join_emits_matches_only() {
        let ctx = PipelineContext::new();
        let mut adapter = JoinAdapter::new(NumberWords, JoinKind::Inner);
        let out = adapter
            .execute(
                DataPipe::from_items([1u32, 2, 3]),
                DataPipe::from_items(right_rows()),
                &ctx,
            )
            .await
            .unwrap();
        let rows: Vec<String> = out.into_typed().unwrap().collect(&ctx).await.unwrap();
        assert_eq!(rows, vec!["1=one", "3=three"]);
    }

    #[tokio::test]
    async fn test_left_outer_join_uses_fallback() {
        let ctx = PipelineContext::new();
        let mut adapter = JoinAdapter::new(NumberWords, JoinKind::LeftOuter);
        let out = adapter
            .execute(
                DataPipe::from_items([1u32, 2]),
                DataPipe::from_items(right_rows()),
                &ctx,
            )
            .await
            .unwrap();
        let rows: Vec<String> = out.into_typed().unwrap().collect(&ctx).await.unwrap();
        assert_eq!(rows, vec!["1=one", "2=?"]);
    }

    #[tokio::test]
    async fn test_unmatched_right_without_fallback_is_dropped() {
        let ctx = PipelineContext::new();
        let mut adapter = JoinAdapter::new(NumberWords, JoinKind::FullOuter);
        let out = adapter
            .execute(
                DataPipe::from_items([1u32]),
                DataPipe::from_items(right_rows()),
                &ctx,
            )
            .await
            .unwrap();
        let rows: Vec<String> = out.into_typed().unwrap().collect(&ctx).await.unwrap();
        // 3 has no right_fallback, so only the matched row survives.
        assert_eq!(rows, vec!["1=one"]);
    }
}
