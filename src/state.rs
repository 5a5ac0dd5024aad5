// Result state of a single load run, as observed by the presentation layer

/// Lifecycle of one asynchronous load: `Loading`, then any number of
/// `Loaded`, then exactly one of `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum State<T> {
    Idle,
    Loading,
    Loaded(T),
    Complete,
    Error(String),
}

impl<T> Default for State<T> {
    fn default() -> Self {
        State::Idle
    }
}

impl<T> State<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Complete | State::Error(_))
    }

    pub fn loaded(&self) -> Option<&T> {
        match self {
            State::Loaded(value) => Some(value),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            State::Error(message) => Some(message),
            _ => None,
        }
    }
}

// Callback surface for the UI; only ever invoked from the publication task
pub trait Presenter<T>: Send + 'static {
    fn on_loading(&mut self);

    fn on_item(&mut self, item: T);

    fn on_complete(&mut self);

    fn on_error(&mut self, message: &str);

    fn render(&mut self, state: State<T>) {
        match state {
            State::Idle => {}
            State::Loading => self.on_loading(),
            State::Loaded(item) => self.on_item(item),
            State::Complete => self.on_complete(),
            State::Error(message) => self.on_error(&message),
        }
    }
}
