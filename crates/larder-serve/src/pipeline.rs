//! The four-stage feed pipeline.
//!
//! Every feed-serving entry point is an instance of the same composition:
//!
//! ```text
//! skeleton → hydration → rules → presentation
//! ```
//!
//! Stages execute strictly in order; each stage's output is the next
//! stage's input, threaded alongside the immutable state and params.
//! The first two stages are the only suspension points. Rules and
//! presentation are pure, synchronous transforms over already-resolved
//! in-memory state:
//!
//! - `skeleton` produces the raw ordered identifier list plus cursor and
//!   never reads hydration state (it doesn't exist yet). Its errors —
//!   invalid cursor, missing viewer — propagate uncaught to the transport
//!   layer; there are no retries inside the pipeline.
//! - `hydration` fans out batch fetches and returns merged state.
//! - `rules` filters the skeleton using hydration state. It must preserve
//!   the relative order of retained items.
//! - `presentation` maps surviving identifiers to views, dropping any that
//!   fail to resolve — "at most N, possibly fewer", never an error for one
//!   missing item.

use crate::error::Result;
use crate::hydration::HydrationState;
use crate::state::AppState;

/// One feed-serving pipeline.
pub trait FeedPipeline {
    type Params;
    type Skeleton;
    type Output;

    /// Produce the ordered identifier skeleton. Must not read hydration
    /// state.
    async fn skeleton(&self, state: &AppState, params: &Self::Params) -> Result<Self::Skeleton>;

    /// Batch-fetch everything the skeleton's identifiers need.
    async fn hydration(
        &self,
        state: &AppState,
        params: &Self::Params,
        skeleton: &Self::Skeleton,
    ) -> Result<HydrationState>;

    /// Filter the skeleton using hydration state. Stable: retained items
    /// keep their relative order.
    fn rules(
        &self,
        state: &AppState,
        params: &Self::Params,
        skeleton: Self::Skeleton,
        hydration: &HydrationState,
    ) -> Self::Skeleton;

    /// Project surviving identifiers into client-facing views.
    fn presentation(
        &self,
        state: &AppState,
        params: &Self::Params,
        skeleton: Self::Skeleton,
        hydration: &HydrationState,
    ) -> Self::Output;
}

/// Execute a pipeline's stages in order.
pub async fn run<P: FeedPipeline>(
    pipeline: &P,
    state: &AppState,
    params: P::Params,
) -> Result<P::Output> {
    let skeleton = pipeline.skeleton(state, &params).await?;
    let hydration = pipeline.hydration(state, &params, &skeleton).await?;
    let skeleton = pipeline.rules(state, &params, skeleton, &hydration);
    Ok(pipeline.presentation(state, &params, skeleton, &hydration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};

    /// Pipeline that records stage order and threads a list through.
    struct Probe {
        stage: AtomicU8,
    }

    impl FeedPipeline for Probe {
        type Params = Vec<u32>;
        type Skeleton = Vec<u32>;
        type Output = Vec<u32>;

        async fn skeleton(&self, _state: &AppState, params: &Vec<u32>) -> Result<Vec<u32>> {
            assert_eq!(self.stage.swap(1, Ordering::SeqCst), 0);
            Ok(params.clone())
        }

        async fn hydration(
            &self,
            _state: &AppState,
            _params: &Vec<u32>,
            _skeleton: &Vec<u32>,
        ) -> Result<HydrationState> {
            assert_eq!(self.stage.swap(2, Ordering::SeqCst), 1);
            Ok(HydrationState::default())
        }

        fn rules(
            &self,
            _state: &AppState,
            _params: &Vec<u32>,
            skeleton: Vec<u32>,
            _hydration: &HydrationState,
        ) -> Vec<u32> {
            assert_eq!(self.stage.swap(3, Ordering::SeqCst), 2);
            // Stable filter: drop odds, keep relative order.
            skeleton.into_iter().filter(|n| n % 2 == 0).collect()
        }

        fn presentation(
            &self,
            _state: &AppState,
            _params: &Vec<u32>,
            skeleton: Vec<u32>,
            _hydration: &HydrationState,
        ) -> Vec<u32> {
            assert_eq!(self.stage.swap(4, Ordering::SeqCst), 3);
            skeleton
        }
    }

    #[tokio::test]
    async fn test_stages_run_in_order_and_thread_data() {
        let state = AppState::in_memory().unwrap();
        let probe = Probe {
            stage: AtomicU8::new(0),
        };
        let out = run(&probe, &state, vec![1, 2, 3, 4, 6, 5]).await.unwrap();
        assert_eq!(out, vec![2, 4, 6]);
        assert_eq!(probe.stage.load(Ordering::SeqCst), 4);
    }

    /// Skeleton failures propagate without reaching later stages.
    struct FailingSkeleton;

    impl FeedPipeline for FailingSkeleton {
        type Params = ();
        type Skeleton = ();
        type Output = ();

        async fn skeleton(&self, _state: &AppState, _params: &()) -> Result<()> {
            Err(crate::error::Error::InvalidCursor("boom".into()))
        }

        async fn hydration(
            &self,
            _state: &AppState,
            _params: &(),
            _skeleton: &(),
        ) -> Result<HydrationState> {
            panic!("hydration must not run after skeleton failure");
        }

        fn rules(&self, _: &AppState, _: &(), _: (), _: &HydrationState) {}

        fn presentation(&self, _: &AppState, _: &(), _: (), _: &HydrationState) {}
    }

    #[tokio::test]
    async fn test_skeleton_error_short_circuits() {
        let state = AppState::in_memory().unwrap();
        let err = run(&FailingSkeleton, &state, ()).await.unwrap_err();
        assert!(err.is_client_error());
    }
}
