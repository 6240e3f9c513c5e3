/// Value of a name as seen from the script stack
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariableValue {
    /// a local variable or procedure parameter
    Value(f64),
    /// a reference parameter that points to an external (blackboard) variable
    External(u64),
}

/// Read access to the local variables that are visible at some stack position.
///
/// The equation solver uses this to resolve names before falling back to external variables.
pub trait LocalVariables {
    fn lookup(&self, name: &str) -> Option<VariableValue>;
}

/// Parameters of `START_PROCESS_EX`; `None` selects the process default
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOptions {
    pub priority: Option<i32>,
    pub cycle_divider: Option<i32>,
    pub delay: Option<i32>,
    pub timeout: Option<i32>,
    pub svl_file: Option<String>,
    pub prefix: Option<String>,
}

/// Services of the surrounding simulation that the script engine relies on.
///
/// Failures are reported as human-readable strings; the engine wraps them into
/// [`RuntimeError`](crate::RuntimeError)s with the position of the failing command.
pub trait ScriptHost {
    /// Evaluate an equation. Names should be looked up in `locals` first.
    fn solve_equation(&mut self, equation: &str, locals: &dyn LocalVariables)
    -> Result<f64, String>;

    /// Current value of an external variable
    fn read_variable(&mut self, name: &str) -> Option<f64> {
        let _ = name;
        None
    }

    /// Assign a value to an external variable
    fn write_variable(&mut self, name: &str, value: f64) -> Result<(), String>;

    /// Identifier of an external variable, used to pass it by reference to a procedure
    fn variable_id(&mut self, name: &str) -> Option<u64> {
        let _ = name;
        None
    }

    /// Assign a value to an external variable that was passed by reference
    fn write_variable_by_id(&mut self, id: u64, value: f64) -> Result<(), String> {
        let _ = value;
        Err(format!("external variable {id} is not writable"))
    }

    /// Resolve `%NAME%` inside of script parameters
    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn start_process(&mut self, name: &str, options: &ProcessOptions) -> Result<(), String> {
        let _ = options;
        Err(format!("no process control available to start \"{name}\""))
    }

    fn is_process_running(&mut self, name: &str) -> bool {
        let _ = name;
        false
    }

    /// Output of the `MESSAGE` and `REPORT_RAW` commands
    fn message(&mut self, text: &str) {
        log::info!("{text}");
    }
}
