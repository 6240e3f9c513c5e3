#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use tempfile::TempDir;
    use xilscript::*;

    #[derive(Default)]
    struct TestHost {
        vars: HashMap<String, f64>,
        ids: Vec<String>,
        env: HashMap<String, String>,
        messages: Vec<String>,
        started: Vec<(String, ProcessOptions)>,
        startup_cycles: u32,
    }

    impl TestHost {
        fn with_vars(vars: &[(&str, f64)]) -> Self {
            Self {
                vars: vars
                    .iter()
                    .map(|(name, value)| ((*name).to_string(), *value))
                    .collect(),
                ..Self::default()
            }
        }

        fn var(&self, name: &str) -> Option<f64> {
            self.vars.get(name).copied()
        }

        fn value(&self, name: &str, locals: &dyn LocalVariables) -> Result<f64, String> {
            match locals.lookup(name) {
                Some(VariableValue::Value(value)) => Ok(value),
                Some(VariableValue::External(id)) => self
                    .ids
                    .get(id as usize)
                    .and_then(|name| self.vars.get(name))
                    .copied()
                    .ok_or_else(|| format!("invalid reference {id}")),
                None => self
                    .vars
                    .get(name)
                    .copied()
                    .ok_or_else(|| format!("unknown variable {name}")),
            }
        }
    }

    // numbers, variables, + - * / and comparisons
    struct Evaluator<'a> {
        text: &'a [u8],
        pos: usize,
        host: &'a TestHost,
        locals: &'a dyn LocalVariables,
    }

    impl Evaluator<'_> {
        fn skip_whitespace(&mut self) {
            while self.text.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
                self.pos += 1;
            }
        }

        fn eat(&mut self, op: &str) -> bool {
            self.skip_whitespace();
            if self.text[self.pos..].starts_with(op.as_bytes()) {
                self.pos += op.len();
                true
            } else {
                false
            }
        }

        fn solve(&mut self) -> Result<f64, String> {
            let value = self.comparison()?;
            self.skip_whitespace();
            if self.pos != self.text.len() {
                return Err(format!("unexpected character at {}", self.pos));
            }
            Ok(value)
        }

        fn comparison(&mut self) -> Result<f64, String> {
            let left = self.sum()?;
            let result = if self.eat("==") {
                left == self.sum()?
            } else if self.eat("!=") {
                left != self.sum()?
            } else if self.eat("<=") {
                left <= self.sum()?
            } else if self.eat(">=") {
                left >= self.sum()?
            } else if self.eat("<") {
                left < self.sum()?
            } else if self.eat(">") {
                left > self.sum()?
            } else {
                return Ok(left);
            };
            Ok(if result { 1.0 } else { 0.0 })
        }

        fn sum(&mut self) -> Result<f64, String> {
            let mut value = self.product()?;
            loop {
                if self.eat("+") {
                    value += self.product()?;
                } else if self.eat("-") {
                    value -= self.product()?;
                } else {
                    return Ok(value);
                }
            }
        }

        fn product(&mut self) -> Result<f64, String> {
            let mut value = self.unary()?;
            loop {
                if self.eat("*") {
                    value *= self.unary()?;
                } else if self.eat("/") {
                    value /= self.unary()?;
                } else {
                    return Ok(value);
                }
            }
        }

        fn unary(&mut self) -> Result<f64, String> {
            if self.eat("-") {
                return Ok(-self.unary()?);
            }
            self.primary()
        }

        fn primary(&mut self) -> Result<f64, String> {
            if self.eat("(") {
                let value = self.comparison()?;
                if !self.eat(")") {
                    return Err("missing )".to_string());
                }
                return Ok(value);
            }
            self.skip_whitespace();
            let start = self.pos;
            let first = self.text.get(start).copied().unwrap_or(0);
            let accept: fn(u8) -> bool = if first.is_ascii_digit() {
                |c| c.is_ascii_digit() || c == b'.'
            } else if first.is_ascii_alphabetic() || first == b'_' {
                |c| c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
            } else {
                return Err(format!("unexpected character at {start}"));
            };
            while self.text.get(self.pos).is_some_and(|c| accept(*c)) {
                self.pos += 1;
            }
            let token = std::str::from_utf8(&self.text[start..self.pos]).unwrap();
            if first.is_ascii_digit() {
                token.parse().map_err(|_| format!("bad number {token}"))
            } else {
                self.host.value(token, self.locals)
            }
        }
    }

    impl ScriptHost for TestHost {
        fn solve_equation(
            &mut self,
            equation: &str,
            locals: &dyn LocalVariables,
        ) -> Result<f64, String> {
            Evaluator {
                text: equation.as_bytes(),
                pos: 0,
                host: self,
                locals,
            }
            .solve()
        }

        fn read_variable(&mut self, name: &str) -> Option<f64> {
            self.var(name)
        }

        fn write_variable(&mut self, name: &str, value: f64) -> Result<(), String> {
            self.vars.insert(name.to_string(), value);
            Ok(())
        }

        fn variable_id(&mut self, name: &str) -> Option<u64> {
            if !self.vars.contains_key(name) {
                return None;
            }
            let id = match self.ids.iter().position(|n| n == name) {
                Some(id) => id,
                None => {
                    self.ids.push(name.to_string());
                    self.ids.len() - 1
                }
            };
            Some(id as u64)
        }

        fn write_variable_by_id(&mut self, id: u64, value: f64) -> Result<(), String> {
            let name = self.ids.get(id as usize).cloned().ok_or("bad id")?;
            self.vars.insert(name, value);
            Ok(())
        }

        fn env_var(&self, name: &str) -> Option<String> {
            self.env.get(name).cloned()
        }

        fn start_process(&mut self, name: &str, options: &ProcessOptions) -> Result<(), String> {
            if name == "broken" {
                return Err("no such executable".to_string());
            }
            self.started.push((name.to_string(), options.clone()));
            Ok(())
        }

        fn is_process_running(&mut self, name: &str) -> bool {
            if !self.started.iter().any(|(started, _)| started == name) {
                return false;
            }
            if self.startup_cycles > 0 {
                self.startup_cycles -= 1;
                return false;
            }
            true
        }

        fn message(&mut self, text: &str) {
            self.messages.push(text.to_string());
        }
    }

    // write_scripts()
    // Returns the path of the first file, which is the main script
    fn write_scripts(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        for (name, text) in files {
            std::fs::write(dir.path().join(name), text).unwrap();
        }
        let main = dir.path().join(files[0].0);
        (dir, main)
    }

    fn run_to_end(script: &mut Script<TestHost>, max_cycles: u32) -> ScriptState {
        for _ in 0..max_cycles {
            let state = script.cyclic();
            if state != ScriptState::Running {
                return state;
            }
        }
        script.state()
    }

    fn run(host: TestHost, path: &Path) -> Script<TestHost> {
        let mut script = Script::new(host);
        script.start(path).unwrap();
        let state = run_to_end(&mut script, 1000);
        assert_eq!(state, ScriptState::Finished, "{:?}", script.last_error());
        script
    }

    // depth_at_line()
    // Run the script and record the stack depth every time the command in `line` is next
    fn depth_at_line(script: &mut Script<TestHost>, line: u32) -> Vec<usize> {
        let mut depths = Vec::new();
        for _ in 0..1000 {
            if let Some(position) = script.current_position() {
                if position.line == line {
                    depths.push(position.stack_depth);
                }
            }
            if script.cyclic() != ScriptState::Running {
                break;
            }
        }
        depths
    }

    #[test]
    fn if_chain() {
        for (x, expected) in [(1.0, 10.0), (2.0, 20.0), (5.0, 30.0)] {
            let (_dir, path) = write_scripts(&[(
                "main.xil",
                "IF (x == 1)\n  r = 10\nELSEIF (x == 2)\n  r = 20\nELSE\n  r = 30\nENDIF\n",
            )]);
            let script = run(TestHost::with_vars(&[("x", x)]), &path);
            assert_eq!(script.host().var("r"), Some(expected));
        }
    }

    #[test]
    fn while_with_break() {
        let text = "i = 0\n\
                    WHILE (1)\n\
                    DEF_LOCALS(t = i)\n\
                    i = t + 1\n\
                    IF (i == 3)\n\
                    BREAK\n\
                    ENDIF\n\
                    END_DEF_LOCALS\n\
                    ENDWHILE\n\
                    after = i\n";
        let (_dir, path) = write_scripts(&[("main.xil", text)]);
        let mut script = Script::new(TestHost::default());
        script.start(&path).unwrap();
        // BREAK left the DEF_LOCALS block of the loop body
        assert_eq!(depth_at_line(&mut script, 10), vec![1]);
        assert_eq!(script.state(), ScriptState::Finished);
        assert_eq!(script.host().var("after"), Some(3.0));
    }

    #[test]
    fn goto_leaves_and_enters_local_scopes() {
        let text = "DEF_LOCALS(a = 1)\n\
                    DEF_LOCALS(b = 2)\n\
                    GOTO(out)\n\
                    END_DEF_LOCALS\n\
                    END_DEF_LOCALS\n\
                    :out GOTO(inside)\n\
                    DEF_LOCALS(x = 5)\n\
                    seen = 1\n\
                    :inside result = x\n\
                    END_DEF_LOCALS\n\
                    done = 1\n";
        let (_dir, path) = write_scripts(&[("main.xil", text)]);
        let mut script = Script::new(TestHost::default());
        script.start(&path).unwrap();
        assert_eq!(depth_at_line(&mut script, 6), vec![1]);

        let mut script = Script::new(TestHost::default());
        script.start(&path).unwrap();
        // the DEF_LOCALS on the way to the label was executed by the GOTO
        assert_eq!(depth_at_line(&mut script, 9), vec![3]);
        assert_eq!(script.state(), ScriptState::Finished);
        assert_eq!(script.host().var("result"), Some(5.0));
        assert_eq!(script.host().var("seen"), None);
        assert_eq!(script.host().var("done"), Some(1.0));
    }

    #[test]
    fn goto_from_inner_scope_into_enclosing_scope() {
        let text = "DEF_LOCALS(a = 1)\n\
                    GOTO(inb)\n\
                    DEF_LOCALS(b = 2)\n\
                    seen = 1\n\
                    :inb GOTO(ina)\n\
                    END_DEF_LOCALS\n\
                    :ina result = a\n\
                    END_DEF_LOCALS\n\
                    done = 1\n";
        let (_dir, path) = write_scripts(&[("main.xil", text)]);
        let mut script = Script::new(TestHost::default());
        script.start(&path).unwrap();
        // entering the inner scope by GOTO created b
        assert_eq!(depth_at_line(&mut script, 5), vec![5]);

        let mut script = Script::new(TestHost::default());
        script.start(&path).unwrap();
        // leaving it again removed b, a is still defined
        assert_eq!(depth_at_line(&mut script, 7), vec![3]);
        assert_eq!(script.state(), ScriptState::Finished);
        assert_eq!(script.host().var("result"), Some(1.0));
        assert_eq!(script.host().var("seen"), None);
        assert_eq!(script.host().var("done"), Some(1.0));
        assert_eq!(script.stack_depth(), 1);
    }

    #[test]
    fn procedure_calls_keep_the_stack_balanced() {
        let text = "DEF_PROC add(a, b, *r)\n\
                    DEF_LOCALS(s = a + b)\n\
                    r = s\n\
                    END_DEF_LOCALS\n\
                    END_DEF_PROC\n\
                    DEF_LOCALS(total = 0)\n\
                    CALL_PROC add(1, 2, &total)\n\
                    result = total\n\
                    CALL_PROC add(total, 10, &ext)\n\
                    END_DEF_LOCALS\n";
        let (_dir, path) = write_scripts(&[("main.xil", text)]);
        let mut script = Script::new(TestHost::with_vars(&[("ext", 0.0)]));
        script.start(&path).unwrap();
        let before = depth_at_line(&mut script, 7);
        let mut script = Script::new(TestHost::with_vars(&[("ext", 0.0)]));
        script.start(&path).unwrap();
        let after = depth_at_line(&mut script, 8);
        assert_eq!(before, vec![3]);
        assert_eq!(after, before);
        assert_eq!(script.state(), ScriptState::Finished);
        assert_eq!(script.host().var("result"), Some(3.0));
        // a reference to an external variable writes through the host
        assert_eq!(script.host().var("ext"), Some(13.0));
    }

    #[test]
    fn gosub_and_return() {
        let text = "GOSUB(sub)\n\
                    after = inner\n\
                    GOTO(end)\n\
                    :sub inner = 4\n\
                    RETURN\n\
                    :end MESSAGE(done)\n";
        let (_dir, path) = write_scripts(&[("main.xil", text)]);
        let mut script = Script::new(TestHost::default());
        script.start(&path).unwrap();
        assert_eq!(depth_at_line(&mut script, 4), vec![2]);
        assert_eq!(script.state(), ScriptState::Finished);
        assert_eq!(script.host().var("after"), Some(4.0));
        assert_eq!(script.host().messages, vec!["done"]);

        let (_dir, path) = write_scripts(&[("main.xil", "RETURN\n")]);
        let mut script = Script::new(TestHost::default());
        script.start(&path).unwrap();
        assert_eq!(run_to_end(&mut script, 10), ScriptState::Error);
        assert!(
            script
                .last_error()
                .unwrap()
                .to_string()
                .contains("not called by GOSUB")
        );
    }

    #[test]
    fn delay_counts_cycles() {
        let (_dir, path) = write_scripts(&[("main.xil", "DELAY(3)\nflag = 1\n")]);
        let mut script = Script::new(TestHost::default());
        script.start(&path).unwrap();
        for _ in 0..3 {
            assert_eq!(script.cyclic(), ScriptState::Running);
        }
        assert_eq!(script.host().var("flag"), None);
        script.cyclic();
        assert_eq!(script.host().var("flag"), Some(1.0));
        assert_eq!(script.cycle_counter(), 4);
    }

    #[test]
    fn wait_until_condition_and_timeouts() {
        let (_dir, path) = write_scripts(&[("main.xil", "WAIT_UNTIL(x == 1, 100)\ndone = 1\n")]);
        let mut script = Script::new(TestHost::with_vars(&[("x", 0.0)]));
        script.start(&path).unwrap();
        for _ in 0..5 {
            script.cyclic();
        }
        assert_eq!(script.host().var("done"), None);
        script.host_mut().vars.insert("x".to_string(), 1.0);
        script.cyclic();
        assert_eq!(script.host().var("done"), Some(1.0));

        let (_dir, path) = write_scripts(&[(
            "main.xil",
            "WAIT_UNTIL(x == 1, 3, STOP, \"timed out\")\ndone = 1\n",
        )]);
        let mut script = Script::new(TestHost::with_vars(&[("x", 0.0)]));
        script.start(&path).unwrap();
        assert_eq!(run_to_end(&mut script, 10), ScriptState::Error);
        assert_eq!(script.cycle_counter(), 4);
        assert_eq!(script.host().messages, vec!["timed out"]);
        assert!(
            script
                .last_error()
                .unwrap()
                .to_string()
                .contains("WAIT_UNTIL with STOP")
        );

        let (_dir, path) =
            write_scripts(&[("main.xil", "WAIT_UNTIL(x == 1, 2, CONT)\ndone = 1\n")]);
        let script = run(TestHost::with_vars(&[("x", 0.0)]), &path);
        assert_eq!(script.host().var("done"), Some(1.0));

        let (_dir, path) = write_scripts(&[(
            "main.xil",
            "WAIT_UNTIL(x == 1, 2, GOTO, late)\nin_time = 1\n:late late = 1\n",
        )]);
        let script = run(TestHost::with_vars(&[("x", 0.0)]), &path);
        assert_eq!(script.host().var("in_time"), None);
        assert_eq!(script.host().var("late"), Some(1.0));

        let (_dir, path) = write_scripts(&[("main.xil", "WAIT_UNTIL(x == 1, 2, LATER)\n")]);
        let mut script = Script::new(TestHost::with_vars(&[("x", 0.0)]));
        let err = script.start(&path).unwrap_err();
        assert!(err.to_string().contains("must be STOP, CONT, GOTO, GOSUB or CALL_PROC"));
    }

    #[test]
    fn wait_until_calls_a_procedure_at_timeout() {
        let text = "DEF_PROC late(v, *r)\n\
                    r = v\n\
                    END_DEF_PROC\n\
                    DEF_LOCALS(got = 0)\n\
                    WAIT_UNTIL(x == 1, 2, CALL_PROC, late, 5, &got, \"too late\")\n\
                    result = got\n\
                    END_DEF_LOCALS\n";
        let (_dir, path) = write_scripts(&[("main.xil", text)]);
        let mut script = Script::new(TestHost::with_vars(&[("x", 0.0)]));
        script.start(&path).unwrap();
        // the procedure returns behind the WAIT_UNTIL
        assert_eq!(depth_at_line(&mut script, 6), vec![3]);
        assert_eq!(script.state(), ScriptState::Finished);
        assert_eq!(script.host().var("result"), Some(5.0));
        assert_eq!(script.host().messages, vec!["too late"]);

        // the condition came true in time, nothing is called
        let mut script = Script::new(TestHost::with_vars(&[("x", 1.0)]));
        script.start(&path).unwrap();
        assert_eq!(run_to_end(&mut script, 100), ScriptState::Finished);
        assert_eq!(script.host().var("result"), Some(0.0));
        assert!(script.host().messages.is_empty());

        let (_dir, path) = write_scripts(&[(
            "main.xil",
            "DEF_PROC p()\ncalled = 1\nEND_DEF_PROC\nWAIT_UNTIL(0, 2, CALL_PROC, p)\ndone = 1\n",
        )]);
        let script = run(TestHost::default(), &path);
        assert_eq!(script.host().var("called"), Some(1.0));
        assert_eq!(script.host().var("done"), Some(1.0));

        for (call, expected) in [
            ("CALL_PROC, unknown", "call unknown Proc \"unknown\""),
            ("CALL_PROC, late, 5", "wrong parameter count 1 (expecting 2)"),
            ("CALL_PROC, late, 5, got", "parameter 2 of proc \"late\""),
            ("CALL_PROC", "needs a target"),
        ] {
            let text = format!(
                "DEF_PROC late(v, *r)\nr = v\nEND_DEF_PROC\nWAIT_UNTIL(0, 2, {call})\n"
            );
            let (_dir, path) = write_scripts(&[("main.xil", text.as_str())]);
            let mut script = Script::new(TestHost::default());
            let err = script.start(&path).unwrap_err();
            assert!(err.to_string().contains(expected), "{call}: {err}");
        }
    }

    #[test]
    fn run_and_using_across_files() {
        let (_dir, path) = write_scripts(&[
            (
                "main.xil",
                "USING(lib.xil)\nCALL_PROC twice(3, &out)\nRUN(sub.xil)\ndone = out + sub\n",
            ),
            ("lib.xil", "DEF_PROC twice(v, *r)\nr = v * 2\nEND_DEF_PROC\n"),
            ("sub.xil", "USING(lib.xil)\nsub = 1\n"),
        ]);
        let mut script = run(TestHost::with_vars(&[("out", 0.0)]), &path);
        assert_eq!(script.host().var("out"), Some(6.0));
        assert_eq!(script.host().var("sub"), Some(1.0));
        assert_eq!(script.host().var("done"), Some(7.0));

        // a second run uses the cached files
        let counter = script.file_change_counter();
        script.host_mut().vars.insert("out".to_string(), 0.0);
        script.start(&path).unwrap();
        assert_eq!(run_to_end(&mut script, 1000), ScriptState::Finished);
        assert_eq!(script.host().var("done"), Some(7.0));
        assert!(script.file_change_counter() > counter);
    }

    #[test]
    fn run_target_from_environment() {
        let (_dir, path) = write_scripts(&[
            ("main.xil", "USING(sub.xil)\nRUN(%SUB%)\ndone = 1\n"),
            ("sub.xil", "sub = 1\n"),
        ]);
        let mut host = TestHost::default();
        host.env.insert("SUB".to_string(), "sub.xil".to_string());
        let script = run(host, &path);
        assert_eq!(script.host().var("sub"), Some(1.0));
        assert_eq!(script.host().var("done"), Some(1.0));
    }

    #[test]
    fn breakpoints_and_single_step() {
        let (_dir, path) = write_scripts(&[("main.xil", "a = 1\nb = 2\nc = 3\nd = 4\n")]);
        let mut script = Script::new(TestHost::default());
        script.add_breakpoint(&path, 3, None).unwrap();
        script.add_breakpoint(&path, 2, Some("a == 5")).unwrap();
        script.start(&path).unwrap();

        assert_eq!(run_to_end(&mut script, 10), ScriptState::DebugHold);
        assert_eq!(script.current_position().unwrap().line, 3);
        assert_eq!(script.host().var("b"), Some(2.0));
        assert_eq!(script.host().var("c"), None);
        let hit = script.breakpoints().iter().find(|bp| bp.line == 3).unwrap();
        assert_eq!(hit.hit_count, 1);
        // the condition was never true
        let conditional = script.breakpoints().iter().find(|bp| bp.line == 2).unwrap();
        assert_eq!(conditional.hit_count, 0);

        script.debug_step_into().unwrap();
        assert_eq!(script.cyclic(), ScriptState::Running);
        assert_eq!(script.host().var("c"), Some(3.0));
        assert_eq!(script.cyclic(), ScriptState::DebugHold);
        assert_eq!(script.current_position().unwrap().line, 4);

        script.debug_continue().unwrap();
        assert_eq!(run_to_end(&mut script, 10), ScriptState::Finished);
        assert_eq!(script.host().var("d"), Some(4.0));
        assert!(script.debug_continue().is_err());
    }

    #[test]
    fn step_over_a_procedure_call() {
        let text = "DEF_PROC p()\n\
                    x = 1\n\
                    y = 2\n\
                    END_DEF_PROC\n\
                    CALL_PROC p()\n\
                    z = 3\n";
        let (_dir, path) = write_scripts(&[("main.xil", text)]);
        let mut script = Script::new(TestHost::default());
        script.add_breakpoint(&path, 5, None).unwrap();
        script.start(&path).unwrap();
        assert_eq!(run_to_end(&mut script, 10), ScriptState::DebugHold);

        script.debug_step_over().unwrap();
        assert_eq!(run_to_end(&mut script, 10), ScriptState::DebugHold);
        assert_eq!(script.current_position().unwrap().line, 6);
        assert_eq!(script.host().var("y"), Some(2.0));
        assert_eq!(script.stack_depth(), 1);
    }

    #[test]
    fn variables_of_the_calling_frame() {
        let text = "DEF_PROC p(x)\n\
                    y = x\n\
                    END_DEF_PROC\n\
                    DEF_LOCALS(x = 1)\n\
                    CALL_PROC p(7)\n\
                    END_DEF_LOCALS\n";
        let (_dir, path) = write_scripts(&[("main.xil", text)]);
        let mut script = Script::new(TestHost::with_vars(&[("x", 100.0)]));
        script.add_breakpoint(&path, 2, None).unwrap();
        script.start(&path).unwrap();
        assert_eq!(run_to_end(&mut script, 10), ScriptState::DebugHold);

        let call = script
            .stack_frames()
            .iter()
            .position(|frame| matches!(frame, Frame::ProcCall { .. }))
            .unwrap();
        // the parameter of the procedure hides the local variable of the caller
        assert_eq!(script.variable_value("x"), Some(7.0));
        assert_eq!(script.variable_value_in_frame("x", call), Some(1.0));
        // below the DEF_LOCALS block only the external variable is left
        assert_eq!(script.variable_value_in_frame("x", 1), Some(100.0));
        assert_eq!(script.evaluate("x * 2", None), Ok(14.0));
        assert_eq!(script.evaluate("x * 2", Some(call)), Ok(2.0));

        script.debug_continue().unwrap();
        assert_eq!(run_to_end(&mut script, 10), ScriptState::Finished);
        assert_eq!(script.host().var("y"), Some(7.0));
    }

    #[test]
    fn stop_at_start() {
        let (_dir, path) = write_scripts(&[("main.xil", "a = 1\n")]);
        let config = ScriptConfig {
            stop_at_start: true,
            ..ScriptConfig::default()
        };
        let mut script = Script::with_config(TestHost::default(), config);
        script.start(&path).unwrap();
        assert_eq!(script.cyclic(), ScriptState::DebugHold);
        assert_eq!(script.host().var("a"), None);
        script.debug_step_into().unwrap();
        script.cyclic();
        assert_eq!(script.host().var("a"), Some(1.0));
    }

    #[test]
    fn parameter_lists() {
        let text = "DEF_PARAM_LIST(L, 1, 2)\n\
                    ADD_PARAM_LIST(L, 3)\n\
                    MESSAGE($[L])\n\
                    DEL_PARAM_LIST(L, 2)\n\
                    MESSAGE(x, $[L])\n\
                    UNDEF_PARAM_LIST(L)\n";
        let (_dir, path) = write_scripts(&[("main.xil", text)]);
        let script = run(TestHost::default(), &path);
        assert_eq!(script.host().messages, vec!["1, 2, 3", "x, 1, 3"]);
        assert_eq!(script.param_lists_string(), "");

        let (_dir, path) = write_scripts(&[("main.xil", "UNDEF_PARAM_LIST(L)\n")]);
        let mut script = Script::new(TestHost::default());
        script.start(&path).unwrap();
        assert_eq!(run_to_end(&mut script, 10), ScriptState::Error);
    }

    #[test]
    fn start_process() {
        let (_dir, path) = write_scripts(&[(
            "main.xil",
            "START_PROCESS_EX(model, 10, , 2, , model.svl)\ndone = 1\n",
        )]);
        let mut host = TestHost::default();
        host.startup_cycles = 2;
        let script = run(host, &path);
        assert_eq!(script.host().var("done"), Some(1.0));
        let (name, options) = &script.host().started[0];
        assert_eq!(name, "model");
        assert_eq!(options.priority, Some(10));
        assert_eq!(options.cycle_divider, None);
        assert_eq!(options.delay, Some(2));
        assert_eq!(options.svl_file.as_deref(), Some("model.svl"));

        let (_dir, path) = write_scripts(&[("main.xil", "START_PROCESS_EX(broken)\n")]);
        let mut script = Script::new(TestHost::default());
        script.start(&path).unwrap();
        assert_eq!(run_to_end(&mut script, 10), ScriptState::Error);
    }

    #[test]
    fn structure_errors_are_reported_with_position() {
        let (_dir, path) = write_scripts(&[("main.xil", "a = 1\nIF (a)\nENDWHILE\n")]);
        let mut script = Script::new(TestHost::default());
        let err = script.start(&path).unwrap_err();
        assert_eq!(script.state(), ScriptState::Error);
        let text = err.to_string();
        assert!(text.contains("main.xil:3:"));
        assert!(text.contains("expecting an ENDIF and not an ENDWHILE"));
    }

    struct Count(CommandDescriptor);

    impl Command for Count {
        fn descriptor(&self) -> &CommandDescriptor {
            &self.0
        }

        fn execute(&self, ctx: &mut ExecContext) -> Result<CmdState, RuntimeError> {
            let value = ctx.solve(0)?;
            ctx.host().message(&format!("count {value}"));
            Ok(CmdState::Done)
        }
    }

    #[test]
    fn custom_command() {
        let (_dir, path) = write_scripts(&[("main.xil", "COUNT(1 + 2)\n")]);
        let mut script = Script::new(TestHost::default());
        let registered = script
            .register_command(Box::new(Count(CommandDescriptor::new("COUNT", 1, 1))))
            .unwrap();
        assert!(registered);
        script.start(&path).unwrap();
        assert_eq!(run_to_end(&mut script, 10), ScriptState::Finished);
        assert_eq!(script.host().messages, vec!["count 3"]);
    }
}
