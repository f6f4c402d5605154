use crate::runtime::Priority;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    Schedule,
    ScheduleOnSignal,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Schedule { queue: usize, priority: Priority },
    ScheduleOnSignal { priority: Priority },
    Reject,
}

/// Records scheduler calls so tests can assert on placement decisions.
#[derive(Debug, Clone)]
pub(crate) struct Tracker {
    calls: Arc<DashMap<Method, Vec<Call>>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        let map = DashMap::new();
        map.insert(Method::Schedule, Vec::new());
        map.insert(Method::ScheduleOnSignal, Vec::new());
        map.insert(Method::Reject, Vec::new());

        Self {
            calls: Arc::new(map),
        }
    }

    pub(crate) fn record(&self, method: Method, call: Call) {
        self.calls
            .get_mut(&method)
            .expect("method not found")
            .push(call)
    }

    pub(crate) fn get_calls(&self, method: &Method) -> Vec<Call> {
        self.calls
            .get(method)
            .expect("method not found")
            .value()
            .clone()
    }

    pub(crate) fn num_calls(&self, method: &Method) -> usize {
        self.calls.get(method).map_or(0, |calls| calls.len())
    }

    /// Queues picked by `schedule`, in call order.
    pub(crate) fn scheduled_queues(&self) -> Vec<usize> {
        self.get_calls(&Method::Schedule)
            .into_iter()
            .filter_map(|call| match call {
                Call::Schedule { queue, .. } => Some(queue),
                _ => None,
            })
            .collect()
    }
}
