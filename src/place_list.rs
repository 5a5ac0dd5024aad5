// Place list view-model: the same two lookups combined with different strategies

use crate::api::ApiService;
use crate::config::DemoConfig;
use crate::models::Places;
use crate::orchestrator::LoadOrchestrator;
use crate::strategies::{
    all_then_combine, error_deferred_merge, group_join, interval_stream, join, merge_as_available,
    race_first, single, switch_on_next, SourceFuture,
};
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

pub struct PlaceListViewModel {
    service: Arc<dyn ApiService>,
    demo: DemoConfig,
    orchestrator: LoadOrchestrator<Places>,
}

impl PlaceListViewModel {
    pub fn new(service: Arc<dyn ApiService>) -> Self {
        Self::with_demo_config(service, DemoConfig::default())
    }

    pub fn with_demo_config(service: Arc<dyn ApiService>, demo: DemoConfig) -> Self {
        Self {
            service,
            demo,
            orchestrator: LoadOrchestrator::new("place_list"),
        }
    }

    pub fn result(&self) -> &LoadOrchestrator<Places> {
        &self.orchestrator
    }

    fn earth_places(&self) -> SourceFuture<Places> {
        let service = self.service.clone();
        async move { service.fetch_earth_places().await }.boxed()
    }

    fn mars_places(&self) -> SourceFuture<Places> {
        let service = self.service.clone();
        async move {
            let places = service.fetch_mars_places().await;
            info!("mars places settled");
            places
        }
        .boxed()
    }

    fn experimental_places(&self) -> SourceFuture<Places> {
        let service = self.service.clone();
        async move { service.fetch_from_experimental_api().await }.boxed()
    }

    /// Relays only whichever lookup answers first.
    pub fn load_the_quickest_one(&self) {
        self.orchestrator
            .start_single(race_first(vec![self.earth_places(), self.mars_places()]));
    }

    /// Waits for both lookups and publishes earth places followed by mars places.
    pub fn load_all_at_once(&self) {
        self.orchestrator.start_single(all_then_combine(
            vec![self.earth_places(), self.mars_places()],
            |parts| parts.concat(),
        ));
    }

    /// Publishes each lookup as soon as it is available.
    pub fn load_on_receive(&self) {
        self.orchestrator.start_stream(merge_as_available(vec![
            single(self.earth_places()),
            single(self.mars_places()),
        ]));
    }

    /// The experimental lookup fails immediately, but its error is only
    /// published after the other two lookups have delivered.
    pub fn load_experimental(&self) {
        self.orchestrator.start_stream(error_deferred_merge(vec![
            single(self.experimental_places()),
            single(self.mars_places()),
            single(self.earth_places()),
        ]));
    }

    pub fn demonstrate_switch_on_next(&self) -> mpsc::UnboundedReceiver<u64> {
        let inner_period = Duration::from_millis(self.demo.switch_inner_period_ms);

        let outer = interval_stream(Duration::from_millis(self.demo.switch_outer_period_ms))
            .map(move |tick| {
                info!(tick, "emitted by outer source");
                info!("starting inner source");
                interval_stream(inner_period)
            })
            .boxed();

        self.orchestrator
            .relay("switch_on_next", switch_on_next(outer))
    }

    pub fn demonstrate_join_behavior(&self) -> mpsc::UnboundedReceiver<String> {
        let left_window = Duration::from_millis(self.demo.join_left_window_ms);
        let right_window = Duration::from_millis(self.demo.join_right_window_ms);

        let first = interval_stream(Duration::from_millis(self.demo.join_left_period_ms))
            .map(|n| format!("SOURCE-1 {}", n))
            .boxed();
        let second = interval_stream(Duration::from_millis(self.demo.join_right_period_ms))
            .map(|n| format!("SOURCE-2 {}", n))
            .boxed();

        let joined = join(
            first,
            second,
            move |_| left_window,
            move |_| right_window,
            |l, r| format!("{}, {}", l, r),
        );
        self.orchestrator.relay("join", joined)
    }

    pub fn demonstrate_group_join(&self) -> mpsc::UnboundedReceiver<(String, String)> {
        let left_window = Duration::from_millis(self.demo.group_left_window_ms);
        let right_window = Duration::from_millis(self.demo.group_right_window_ms);

        let left = interval_stream(Duration::from_millis(self.demo.group_left_period_ms))
            .map(|n| format!("SOURCE-1 {}", n))
            .boxed();
        let right = interval_stream(Duration::from_millis(self.demo.group_right_period_ms))
            .map(|n| format!("SOURCE-2 {}", n))
            .boxed();

        let grouped = group_join(left, right, move |_| left_window, move |_| right_window)
            .flat_map(|(l, group)| group.map(move |r| (l.clone(), r)));
        self.orchestrator.relay("group_join", grouped)
    }

    pub fn dispose_currently_running_streams(&self) {
        self.orchestrator.cancel_all();
    }
}
