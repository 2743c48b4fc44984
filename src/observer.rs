use crate::error::RenderGraphError;
use crate::pass::PassStatistics;

pub type SetupObserver = Box<dyn FnMut(&str) + Send>;
pub type ExecutedObserver = Box<dyn FnMut(&str, &PassStatistics) + Send>;
pub type ErrorObserver = Box<dyn FnMut(&str, &RenderGraphError) + Send>;

/// Callbacks invoked synchronously, in registration order.
#[derive(Default)]
pub struct PassObservers {
    setup: Vec<SetupObserver>,
    executed: Vec<ExecutedObserver>,
    error: Vec<ErrorObserver>,
}

impl PassObservers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after a pass finished its setup for a compile.
    pub fn on_pass_setup(&mut self, observer: impl FnMut(&str) + Send + 'static) {
        self.setup.push(Box::new(observer));
    }

    /// Called after a pass executed successfully.
    pub fn on_pass_executed(
        &mut self,
        observer: impl FnMut(&str, &PassStatistics) + Send + 'static,
    ) {
        self.executed.push(Box::new(observer));
    }

    /// Called when setup or execute of a pass fails.
    pub fn on_pass_error(
        &mut self,
        observer: impl FnMut(&str, &RenderGraphError) + Send + 'static,
    ) {
        self.error.push(Box::new(observer));
    }

    pub(crate) fn notify_setup(&mut self, pass_name: &str) {
        for observer in &mut self.setup {
            observer(pass_name);
        }
    }

    pub(crate) fn notify_executed(&mut self, pass_name: &str, statistics: &PassStatistics) {
        for observer in &mut self.executed {
            observer(pass_name, statistics);
        }
    }

    pub(crate) fn notify_error(&mut self, pass_name: &str, error: &RenderGraphError) {
        for observer in &mut self.error {
            observer(pass_name, error);
        }
    }

    pub fn len(&self) -> usize {
        self.setup.len() + self.executed.len() + self.error.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.setup.clear();
        self.executed.clear();
        self.error.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn observers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut observers = PassObservers::new();

        for tag in ["first", "second"] {
            let log = Arc::clone(&log);
            observers.on_pass_setup(move |pass| log.lock().unwrap().push(format!("{tag}:{pass}")));
        }
        let errors = Arc::clone(&log);
        observers.on_pass_error(move |pass, error| {
            errors.lock().unwrap().push(format!("error:{pass}:{error}"))
        });

        observers.notify_setup("gbuffer");
        observers.notify_error("lighting", &"lost".into());
        observers.notify_executed("gbuffer", &PassStatistics::new("gbuffer"));

        assert_eq!(
            *log.lock().unwrap(),
            ["first:gbuffer", "second:gbuffer", "error:lighting:lost"]
        );
        assert_eq!(observers.len(), 3);

        observers.clear();
        assert!(observers.is_empty());
    }
}
