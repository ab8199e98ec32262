use std::{
    collections::{HashMap, HashSet},
    fmt,
    io::{self, Write},
    rc::Rc,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    ast::{
        AssignTarget, BinaryOp, Expr, Function as FunctionAst, Literal, LogicalOp, Program, Stmt,
        TableItem, UnaryOp,
    },
    error::{FountainError, FountainResult},
    lexer,
};

const MAX_CALL_DEPTH: usize = 1000;

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Str(String),
    Table(TableId),
    Function(Rc<FunctionValue>),
    Builtin(Rc<BuiltinFunction>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::Table(id) => write!(f, "<table #{}>", id.0),
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer::Lexer, parser::Parser};
    use std::cell::RefCell;

    #[derive(Clone, Default)]
    struct SharedOutput(Rc<RefCell<Vec<u8>>>);

    impl SharedOutput {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    impl io::Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run_source(source: &str) -> FountainResult<(Interpreter, String)> {
        let output = SharedOutput::default();
        let mut interpreter = Interpreter::with_output(Box::new(output.clone()));
        let tokens = Lexer::new(source).lex()?;
        let program = Parser::new(tokens).parse_program()?;
        interpreter.eval_program(&program)?;
        Ok((interpreter, output.text()))
    }

    fn printed(source: &str) -> String {
        let (_, output) = run_source(source).expect("program should run");
        output
    }

    fn run_err(source: &str) -> FountainError {
        match run_source(source) {
            Ok(_) => panic!("program should fail"),
            Err(err) => err,
        }
    }

    #[test]
    fn arithmetic_respects_precedence() {
        assert_eq!(printed("print 1 + 2 * 3"), "7\n");
        assert_eq!(printed("print (1 + 2) * 3"), "9\n");
        assert_eq!(printed("print 10 - 3 - 2"), "5\n");
    }

    #[test]
    fn whole_numbers_print_without_decimal_point() {
        assert_eq!(printed("print 6 / 2"), "3\n");
        assert_eq!(printed("print 1 / 4"), "0.25\n");
    }

    #[test]
    fn division_by_zero_follows_ieee() {
        assert_eq!(printed("print 1 / 0"), "inf\n");
        assert_eq!(printed("print -1 / 0"), "-inf\n");
        assert_eq!(printed("print 0 / 0"), "NaN\n");
    }

    #[test]
    fn arithmetic_on_strings_is_a_type_error() {
        let err = run_err("print 'a' + 'b'");
        match err {
            FountainError::Type(message) => {
                assert!(message.contains("'+'"), "unexpected message: {}", message)
            }
            other => panic!("expected type error, got {:?}", other),
        }
    }

    #[test]
    fn comparing_mixed_types_is_a_type_error() {
        assert!(matches!(run_err("print 'a' < 1"), FountainError::Type(_)));
    }

    #[test]
    fn equality_never_coerces() {
        assert_eq!(printed("print 1 == '1'"), "false\n");
        assert_eq!(printed("print nil == false"), "false\n");
        assert_eq!(printed("print 'a' == 'a'"), "true\n");
        assert_eq!(printed("print 1 != 2"), "true\n");
    }

    #[test]
    fn tables_compare_by_identity() {
        assert_eq!(printed("a = {} b = {} print a == b"), "false\n");
        assert_eq!(printed("a = {} b = a print a == b"), "true\n");
    }

    #[test]
    fn zero_and_empty_string_are_truthy() {
        assert_eq!(printed("print 'yes' if 0 else 'no'"), "yes\n");
        assert_eq!(printed("print 'yes' if '' else 'no'"), "yes\n");
        assert_eq!(printed("print 'yes' if nil else 'no'"), "no\n");
        assert_eq!(printed("print 'yes' if false else 'no'"), "no\n");
    }

    #[test]
    fn logical_operators_return_the_deciding_operand() {
        assert_eq!(printed("print 1 and 2"), "2\n");
        assert_eq!(printed("print nil and 2"), "nil\n");
        assert_eq!(printed("print nil or 'fallback'"), "fallback\n");
        assert_eq!(printed("print 'first' or 'second'"), "first\n");
    }

    #[test]
    fn logical_operators_short_circuit() {
        let source = "
            fn boom()
                assert false, 'should not run'
            end
            print false and boom()
            print true or boom()
        ";
        assert_eq!(printed(source), "false\ntrue\n");
    }

    #[test]
    fn not_always_produces_a_bool() {
        assert_eq!(printed("print not nil"), "true\n");
        assert_eq!(printed("print not 0"), "false\n");
        assert_eq!(printed("print not not 'x'"), "true\n");
    }

    #[test]
    fn negating_a_non_number_is_a_type_error() {
        assert!(matches!(run_err("print -'x'"), FountainError::Type(_)));
    }

    #[test]
    fn conditional_expression_evaluates_one_branch() {
        let source = "
            fn boom()
                assert false, 'should not run'
            end
            print 1 if true else boom()
        ";
        assert_eq!(printed(source), "1\n");
    }

    #[test]
    fn undefined_name_is_reported() {
        match run_err("print missing") {
            FountainError::UndefinedName(message) => {
                assert!(message.contains("'missing'"))
            }
            other => panic!("expected name error, got {:?}", other),
        }
    }

    #[test]
    fn assignment_updates_the_defining_scope() {
        let source = "
            x = 1
            do
                x = 2
            end
            print x
        ";
        assert_eq!(printed(source), "2\n");
    }

    #[test]
    fn first_assignment_in_a_block_stays_local() {
        let source = "
            do
                local = 1
            end
            print local
        ";
        assert!(matches!(run_err(source), FountainError::UndefinedName(_)));
    }

    #[test]
    fn if_statement_picks_a_branch() {
        assert_eq!(printed("if 1 < 2 do print 'a' else print 'b' end"), "a\n");
        assert_eq!(printed("if 1 > 2 do print 'a' else print 'b' end"), "b\n");
    }

    #[test]
    fn for_loop_counts_with_break_and_continue() {
        let source = "
            i = 0
            for do
                i = i + 1
                if i == 2 do continue end
                if i > 4 do break end
                print i
            end
        ";
        assert_eq!(printed(source), "1\n3\n4\n");
    }

    #[test]
    fn break_only_exits_the_innermost_loop() {
        let source = "
            outer = 0
            for do
                outer = outer + 1
                if outer > 2 do break end
                for do
                    break
                end
                print outer
            end
        ";
        assert_eq!(printed(source), "1\n2\n");
    }

    #[test]
    fn function_call_returns_a_value() {
        let source = "
            fn add(a, b)
                return a + b
            end
            print add(2, 3)
        ";
        assert_eq!(printed(source), "5\n");
    }

    #[test]
    fn falling_off_the_end_returns_nil() {
        let source = "
            fn noop()
            end
            print noop()
        ";
        assert_eq!(printed(source), "nil\n");
    }

    #[test]
    fn return_skips_the_rest_of_the_body() {
        let source = "
            fn early()
                return 1
                print 'unreachable'
            end
            print early()
        ";
        assert_eq!(printed(source), "1\n");
    }

    #[test]
    fn closures_capture_their_environment() {
        let source = "
            fn make_counter()
                count = 0
                fn tick()
                    count = count + 1
                    return count
                end
                return tick
            end
            c = make_counter()
            print c()
            print c()
            print c()
        ";
        assert_eq!(printed(source), "1\n2\n3\n");
    }

    #[test]
    fn sibling_closures_share_their_captured_scope() {
        let source = "
            fn make_cell()
                value = 0
                fn set(v)
                    value = v
                end
                fn get()
                    return value
                end
                return {set, get}
            end
            cell = make_cell()
            setter = cell[0]
            getter = cell[1]
            setter(42)
            print getter()
        ";
        assert_eq!(printed(source), "42\n");
    }

    #[test]
    fn defaults_are_evaluated_at_call_time_in_the_call_scope() {
        let source = "
            fn f(a, b = a + 1)
                return b
            end
            print f(2)
            print f(2, 10)
        ";
        assert_eq!(printed(source), "3\n10\n");
    }

    #[test]
    fn named_arguments_bind_by_parameter_name() {
        let source = "
            fn sub(a, b)
                return a - b
            end
            print sub(b = 3, a = 10)
            print sub(10, b = 3)
        ";
        assert_eq!(printed(source), "7\n7\n");
    }

    #[test]
    fn missing_argument_is_an_argument_error() {
        let source = "
            fn f(a, b)
            end
            f(1)
        ";
        match run_err(source) {
            FountainError::Argument(message) => {
                assert!(message.contains("missing 1 required"), "{}", message);
                assert!(message.contains("'b'"), "{}", message);
            }
            other => panic!("expected argument error, got {:?}", other),
        }
    }

    #[test]
    fn too_many_positional_arguments_is_an_argument_error() {
        let source = "
            fn f(a)
            end
            f(1, 2)
        ";
        match run_err(source) {
            FountainError::Argument(message) => {
                assert!(message.contains("takes 1 positional argument"), "{}", message)
            }
            other => panic!("expected argument error, got {:?}", other),
        }
    }

    #[test]
    fn unexpected_keyword_argument_is_reported() {
        let source = "
            fn f(a)
            end
            f(1, z = 2)
        ";
        match run_err(source) {
            FountainError::Argument(message) => {
                assert!(message.contains("unexpected keyword argument 'z'"), "{}", message)
            }
            other => panic!("expected argument error, got {:?}", other),
        }
    }

    #[test]
    fn positional_and_named_for_same_parameter_is_reported() {
        let source = "
            fn f(a)
            end
            f(1, a = 2)
        ";
        match run_err(source) {
            FountainError::Argument(message) => {
                assert!(message.contains("multiple values for argument 'a'"), "{}", message)
            }
            other => panic!("expected argument error, got {:?}", other),
        }
    }

    #[test]
    fn recursion_works() {
        let source = "
            fn fib(n)
                return n if n < 2 else fib(n - 1) + fib(n - 2)
            end
            print fib(10)
        ";
        assert_eq!(printed(source), "55\n");
    }

    #[test]
    fn runaway_recursion_hits_the_depth_cap() {
        // A tree-walking call consumes native stack, so give the test
        // thread enough room to reach the interpreter's own limit.
        let handle = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let source = "
                    fn f()
                        return f()
                    end
                    f()
                ";
                matches!(run_err(source), FountainError::Resource(_))
            })
            .expect("thread should spawn");
        assert!(handle.join().expect("thread should not panic"));
    }

    #[test]
    fn calling_a_non_function_is_a_type_error() {
        assert!(matches!(run_err("x = 1 x()"), FountainError::Type(_)));
    }

    #[test]
    fn table_literal_mixes_item_forms() {
        assert_eq!(printed("print {1, 2, x = 3, [4] = 5}"), "{1, 2, x = 3, [4] = 5}\n");
        assert_eq!(printed("print {}"), "{}\n");
    }

    #[test]
    fn strings_are_quoted_inside_tables_but_bare_at_top_level() {
        assert_eq!(printed("print 'hi'"), "hi\n");
        assert_eq!(printed("print {'hi'}"), "{\"hi\"}\n");
        assert_eq!(printed("print {msg = 'a\\nb'}"), "{msg = \"a\\nb\"}\n");
    }

    #[test]
    fn table_reads_and_writes_by_key() {
        let source = "
            t = {}
            t[0] = 'zero'
            t.name = 'fountain'
            print t[0]
            print t['name']
            print t.name
            print t.absent
        ";
        assert_eq!(printed(source), "zero\nfountain\nfountain\nnil\n");
    }

    #[test]
    fn updating_a_key_keeps_its_position() {
        let source = "
            t = {a = 1, b = 2}
            t.a = 10
            print t
        ";
        assert_eq!(printed(source), "{a = 10, b = 2}\n");
    }

    #[test]
    fn insertion_order_is_preserved_in_rendering() {
        let source = "
            t = {}
            t.z = 1
            t.a = 2
            t[true] = 3
            print t
        ";
        assert_eq!(printed(source), "{z = 1, a = 2, [true] = 3}\n");
    }

    #[test]
    fn sequential_numeric_keys_render_positionally() {
        let source = "
            t = {}
            t[0] = 'a'
            t[1] = 'b'
            t[3] = 'c'
            print t
        ";
        assert_eq!(printed(source), "{\"a\", \"b\", [3] = \"c\"}\n");
    }

    #[test]
    fn rendered_tables_reparse_to_the_same_rendering() {
        let first = printed("print {10, 20, name = 'n', [true] = 1}");
        let second = printed(&format!("print {}", first.trim_end()));
        assert_eq!(first, second);
    }

    #[test]
    fn self_referential_tables_render_without_looping() {
        let source = "
            t = {}
            t.me = t
            print t
        ";
        assert_eq!(printed(source), "{me = {...}}\n");
    }

    #[test]
    fn indexing_a_non_table_is_a_type_error() {
        assert!(matches!(run_err("x = 1 print x[0]"), FountainError::Type(_)));
        assert!(matches!(run_err("x = 'a' x[0] = 1"), FountainError::Type(_)));
    }

    #[test]
    fn tables_can_be_keys() {
        let source = "
            k = {}
            t = {}
            t[k] = 'found'
            print t[k]
            print t[{}]
        ";
        assert_eq!(printed(source), "found\nnil\n");
    }

    #[test]
    fn integral_floats_hit_the_same_key() {
        assert_eq!(printed("t = {} t[1] = 'a' print t[1.0]"), "a\n");
    }

    #[test]
    fn nan_keys_work_by_bit_pattern_despite_nan_inequality() {
        assert_eq!(printed("t = {} t[0/0] = 'found' print t[0/0]"), "found\n");
        assert_eq!(printed("print 0/0 == 0/0"), "false\n");
    }

    #[test]
    fn functions_render_by_name() {
        let source = "
            fn greet()
            end
            print greet
            print clock
        ";
        assert_eq!(printed(source), "<function greet>\n<built-in function clock>\n");
    }

    #[test]
    fn assert_passes_silently_and_fails_loudly() {
        assert_eq!(printed("assert 1 < 2 print 'ok'"), "ok\n");
        match run_err("assert 1 > 2, 'math is broken'") {
            FountainError::Assertion(message) => assert_eq!(message, "math is broken"),
            other => panic!("expected assertion error, got {:?}", other),
        }
        match run_err("assert nil") {
            FountainError::Assertion(message) => assert_eq!(message, "<assertion failed>"),
            other => panic!("expected assertion error, got {:?}", other),
        }
    }

    #[test]
    fn assert_message_carries_the_rendered_value_unchanged() {
        match run_err("assert false, 1 + 1") {
            FountainError::Assertion(message) => assert_eq!(message, "2"),
            other => panic!("expected assertion error, got {:?}", other),
        }
    }

    #[test]
    fn clock_returns_a_number() {
        let (interpreter, _) = run_source("t = clock()").expect("program should run");
        match interpreter.get_global("t") {
            Some(Value::Number(n)) => assert!(n > 0.0),
            other => panic!("expected a number, got {:?}", other),
        }
    }

    #[test]
    fn builtins_reject_named_arguments() {
        assert!(matches!(
            run_err("clock(precision = 'high')"),
            FountainError::Argument(_)
        ));
    }

    #[test]
    fn host_builtins_are_callable_from_scripts() {
        let output = SharedOutput::default();
        let mut interpreter = Interpreter::with_output(Box::new(output.clone()));
        interpreter.define_builtin("double", |_, args| match args {
            [Value::Number(n)] => Ok(Value::Number(n * 2.0)),
            _ => Err(FountainError::Argument(
                "double() expects one number".to_string(),
            )),
        });
        let tokens = Lexer::new("print double(21)").lex().expect("lexes");
        let program = Parser::new(tokens).parse_program().expect("parses");
        interpreter.eval_program(&program).expect("runs");
        assert_eq!(output.text(), "42\n");
    }

    #[test]
    fn globals_are_reachable_after_the_run() {
        let (interpreter, _) = run_source("x = 1 + 1").expect("program should run");
        match interpreter.get_global("x") {
            Some(Value::Number(n)) => assert_eq!(n, 2.0),
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn shared_tables_alias_through_assignment() {
        let source = "
            a = {}
            b = a
            b.x = 1
            print a.x
        ";
        assert_eq!(printed(source), "1\n");
    }

    #[test]
    fn loop_bodies_share_the_enclosing_scope() {
        let source = "
            for do
                found = 'yes'
                break
            end
            print found
        ";
        assert_eq!(printed(source), "yes\n");
    }
}

/// Handle into the interpreter's table arena. Copying the handle aliases
/// the table; the data lives until the interpreter is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvId(usize);

pub struct FunctionValue {
    pub name: String,
    pub declaration: FunctionAst,
    pub env: EnvId,
}

pub struct BuiltinFunction {
    pub name: String,
    pub func: Rc<dyn Fn(&mut Interpreter, &[Value]) -> FountainResult<Value>>,
}

/// Keys are compared by value for nil, bools, numbers and strings, and by
/// identity for tables and functions. Number keys use the bit pattern, with
/// negative zero folded into zero so `t[-0.0]` and `t[0]` agree. This makes
/// NaN usable as a key: two NaNs with the same bits hit the same entry even
/// though `==` on NaN is always false.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum HashKey {
    Nil,
    Bool(bool),
    Number(u64),
    Str(String),
    Table(usize),
    Function(usize),
    Builtin(usize),
}

fn hash_key(value: &Value) -> HashKey {
    match value {
        Value::Nil => HashKey::Nil,
        Value::Bool(b) => HashKey::Bool(*b),
        Value::Number(n) => {
            let n = if *n == 0.0 { 0.0 } else { *n };
            HashKey::Number(n.to_bits())
        }
        Value::Str(s) => HashKey::Str(s.clone()),
        Value::Table(id) => HashKey::Table(id.0),
        Value::Function(func) => HashKey::Function(Rc::as_ptr(func) as usize),
        Value::Builtin(b) => HashKey::Builtin(Rc::as_ptr(b) as usize),
    }
}

/// Insertion-ordered table: `entries` is the order, `index` maps a key to
/// its slot. Updates overwrite in place and keep the original position.
#[derive(Default)]
struct TableData {
    entries: Vec<(Value, Value)>,
    index: HashMap<HashKey, usize>,
}

struct EnvData {
    values: HashMap<String, Value>,
    parent: Option<EnvId>,
}

/// Result of executing a statement. Break, Continue and Return unwind
/// through enclosing statements until a loop or call consumes them.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

pub struct Interpreter {
    envs: Vec<EnvData>,
    tables: Vec<TableData>,
    global: EnvId,
    output: Box<dyn io::Write>,
    call_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Build an interpreter whose `print` statement writes to `output`
    /// instead of stdout.
    pub fn with_output(output: Box<dyn io::Write>) -> Self {
        let mut interpreter = Self {
            envs: vec![EnvData {
                values: HashMap::new(),
                parent: None,
            }],
            tables: Vec::new(),
            global: EnvId(0),
            output,
            call_depth: 0,
        };
        interpreter.install_builtins();
        interpreter
    }

    /// Register a host function callable from scripts under `name`.
    pub fn define_builtin<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&mut Interpreter, &[Value]) -> FountainResult<Value> + 'static,
    {
        let builtin = Rc::new(BuiltinFunction {
            name: name.to_string(),
            func: Rc::new(func),
        });
        self.env_define(self.global, name.to_string(), Value::Builtin(builtin));
    }

    fn install_builtins(&mut self) {
        self.define_builtin("clock", |_, args| {
            if !args.is_empty() {
                return Err(FountainError::Argument(format!(
                    "clock() takes 0 positional arguments but {} were given",
                    args.len()
                )));
            }
            let elapsed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| FountainError::Resource(format!("system clock error: {}", e)))?;
            Ok(Value::Number(elapsed.as_secs_f64()))
        });
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.env_get(self.global, name)
    }

    pub fn eval_program(&mut self, program: &Program) -> FountainResult<()> {
        for statement in &program.statements {
            match self.exec_statement(statement, self.global)? {
                Flow::Normal => {}
                _ => {
                    return Err(FountainError::ControlFlow {
                        message: "control flow escaped the top level".to_string(),
                        location: None,
                    })
                }
            }
        }
        Ok(())
    }

    fn exec_statement(&mut self, statement: &Stmt, env: EnvId) -> FountainResult<Flow> {
        match statement {
            Stmt::Expression(expr) => {
                self.eval_expression(expr, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Print(expr) => {
                let value = self.eval_expression(expr, env)?;
                let text = self.stringify(&value);
                writeln!(self.output, "{}", text)?;
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, value } => {
                let value = self.eval_expression(value, env)?;
                self.exec_assignment(target, value, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Block(statements) => {
                let child = self.new_env(Some(env));
                self.exec_block(statements, child)
            }
            Stmt::If { test, body, orelse } => {
                let test = self.eval_expression(test, env)?;
                if truthy(&test) {
                    self.exec_block(body, env)
                } else {
                    self.exec_block(orelse, env)
                }
            }
            Stmt::For { body } => {
                loop {
                    match self.exec_block(body, env)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Return { value } => {
                let value = match value {
                    Some(expr) => self.eval_expression(expr, env)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Function(declaration) => {
                let func = Value::Function(Rc::new(FunctionValue {
                    name: declaration.name.clone(),
                    declaration: declaration.clone(),
                    env,
                }));
                self.env_assign(env, &declaration.name, func);
                Ok(Flow::Normal)
            }
            Stmt::Assert { test, message } => {
                let test = self.eval_expression(test, env)?;
                if truthy(&test) {
                    return Ok(Flow::Normal);
                }
                let text = match message {
                    Some(expr) => {
                        let value = self.eval_expression(expr, env)?;
                        self.stringify(&value)
                    }
                    None => "<assertion failed>".to_string(),
                };
                Err(FountainError::Assertion(text))
            }
        }
    }

    fn exec_block(&mut self, statements: &[Stmt], env: EnvId) -> FountainResult<Flow> {
        for statement in statements {
            match self.exec_statement(statement, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_assignment(
        &mut self,
        target: &AssignTarget,
        value: Value,
        env: EnvId,
    ) -> FountainResult<()> {
        match target {
            AssignTarget::Name(name) => {
                self.env_assign(env, name, value);
                Ok(())
            }
            AssignTarget::Index { table, key } => {
                let table = self.eval_expression(table, env)?;
                let key = self.eval_expression(key, env)?;
                let id = self.expect_table(&table)?;
                self.table_set(id, key, value);
                Ok(())
            }
            AssignTarget::Field { table, name } => {
                let table = self.eval_expression(table, env)?;
                let id = self.expect_table(&table)?;
                self.table_set(id, Value::Str(name.clone()), value);
                Ok(())
            }
        }
    }

    fn eval_expression(&mut self, expr: &Expr, env: EnvId) -> FountainResult<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Nil => Value::Nil,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Number(n) => Value::Number(*n),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Variable(name) => self.env_get(env, name).ok_or_else(|| {
                FountainError::UndefinedName(format!("name '{}' is not defined", name))
            }),
            Expr::Unary { op, right } => {
                let right = self.eval_expression(right, env)?;
                match op {
                    UnaryOp::Negate => match right {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        other => Err(FountainError::Type(format!(
                            "unsupported operand type for '-': '{}'",
                            type_name(&other)
                        ))),
                    },
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&right))),
                }
            }
            Expr::Binary { left, op, right } => {
                let left = self.eval_expression(left, env)?;
                let right = self.eval_expression(right, env)?;
                self.eval_binary(*op, left, right)
            }
            Expr::Logical { left, op, right } => {
                let left = self.eval_expression(left, env)?;
                match op {
                    LogicalOp::And if !truthy(&left) => Ok(left),
                    LogicalOp::Or if truthy(&left) => Ok(left),
                    _ => self.eval_expression(right, env),
                }
            }
            Expr::Conditional { test, body, orelse } => {
                let test = self.eval_expression(test, env)?;
                if truthy(&test) {
                    self.eval_expression(body, env)
                } else {
                    self.eval_expression(orelse, env)
                }
            }
            Expr::Call {
                callee,
                pos_args,
                kw_args,
            } => {
                let callee = self.eval_expression(callee, env)?;
                let mut pos = Vec::with_capacity(pos_args.len());
                for arg in pos_args {
                    pos.push(self.eval_expression(arg, env)?);
                }
                let mut named = Vec::with_capacity(kw_args.len());
                for (name, arg) in kw_args {
                    named.push((name.clone(), self.eval_expression(arg, env)?));
                }
                self.call_value(callee, pos, named)
            }
            Expr::Index { table, key } => {
                let table = self.eval_expression(table, env)?;
                let key = self.eval_expression(key, env)?;
                let id = self.expect_table(&table)?;
                Ok(self.table_get(id, &key).unwrap_or(Value::Nil))
            }
            Expr::Field { table, name } => {
                let table = self.eval_expression(table, env)?;
                let id = self.expect_table(&table)?;
                Ok(self
                    .table_get(id, &Value::Str(name.clone()))
                    .unwrap_or(Value::Nil))
            }
            Expr::Group(inner) => self.eval_expression(inner, env),
            Expr::Table(items) => self.eval_table_literal(items, env),
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, left: Value, right: Value) -> FountainResult<Value> {
        match op {
            BinaryOp::Eq => return Ok(Value::Bool(values_equal(&left, &right))),
            BinaryOp::NotEq => return Ok(Value::Bool(!values_equal(&left, &right))),
            _ => {}
        }

        let (a, b) = match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => (*a, *b),
            _ => {
                return Err(FountainError::Type(format!(
                    "unsupported operand type(s) for '{}': '{}' and '{}'",
                    op.lexeme(),
                    type_name(&left),
                    type_name(&right)
                )))
            }
        };

        // Division by zero is deliberate IEEE passthrough: inf or NaN.
        Ok(match op {
            BinaryOp::Add => Value::Number(a + b),
            BinaryOp::Sub => Value::Number(a - b),
            BinaryOp::Mul => Value::Number(a * b),
            BinaryOp::Div => Value::Number(a / b),
            BinaryOp::Less => Value::Bool(a < b),
            BinaryOp::LessEq => Value::Bool(a <= b),
            BinaryOp::Greater => Value::Bool(a > b),
            BinaryOp::GreaterEq => Value::Bool(a >= b),
            BinaryOp::Eq | BinaryOp::NotEq => unreachable!("handled above"),
        })
    }

    fn eval_table_literal(&mut self, items: &[TableItem], env: EnvId) -> FountainResult<Value> {
        let id = self.new_table();
        let mut auto_index = 0.0;
        for item in items {
            match item {
                TableItem::Positional(expr) => {
                    let value = self.eval_expression(expr, env)?;
                    self.table_set(id, Value::Number(auto_index), value);
                    auto_index += 1.0;
                }
                TableItem::Named { name, value } => {
                    let value = self.eval_expression(value, env)?;
                    self.table_set(id, Value::Str(name.clone()), value);
                }
                TableItem::Keyed { key, value } => {
                    let key = self.eval_expression(key, env)?;
                    let value = self.eval_expression(value, env)?;
                    self.table_set(id, key, value);
                }
            }
        }
        Ok(Value::Table(id))
    }

    fn call_value(
        &mut self,
        callee: Value,
        pos: Vec<Value>,
        named: Vec<(String, Value)>,
    ) -> FountainResult<Value> {
        match callee {
            Value::Function(func) => self.call_function(func, pos, named),
            Value::Builtin(builtin) => {
                if !named.is_empty() {
                    return Err(FountainError::Argument(format!(
                        "{}() does not accept named arguments",
                        builtin.name
                    )));
                }
                let func = Rc::clone(&builtin.func);
                func(self, &pos)
            }
            other => Err(FountainError::Type(format!(
                "'{}' value is not callable",
                type_name(&other)
            ))),
        }
    }

    fn call_function(
        &mut self,
        func: Rc<FunctionValue>,
        pos: Vec<Value>,
        named: Vec<(String, Value)>,
    ) -> FountainResult<Value> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(FountainError::Resource(format!(
                "maximum call depth ({}) exceeded",
                MAX_CALL_DEPTH
            )));
        }

        let params = &func.declaration.params;
        if pos.len() > params.len() {
            return Err(FountainError::Argument(format!(
                "{}() takes {} positional argument{} but {} were given",
                func.name,
                params.len(),
                if params.len() == 1 { "" } else { "s" },
                pos.len()
            )));
        }

        let mut supplied: Vec<Option<Value>> = params.iter().map(|_| None).collect();
        for (slot, value) in supplied.iter_mut().zip(pos) {
            *slot = Some(value);
        }
        for (name, value) in named {
            match params.iter().position(|p| p.name == name) {
                None => {
                    return Err(FountainError::Argument(format!(
                        "{}() got an unexpected keyword argument '{}'",
                        func.name, name
                    )))
                }
                Some(i) => {
                    if supplied[i].is_some() {
                        return Err(FountainError::Argument(format!(
                            "{}() got multiple values for argument '{}'",
                            func.name, name
                        )));
                    }
                    supplied[i] = Some(value);
                }
            }
        }

        let missing: Vec<&str> = params
            .iter()
            .zip(&supplied)
            .filter(|(param, slot)| slot.is_none() && param.default.is_none())
            .map(|(param, _)| param.name.as_str())
            .collect();
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|n| format!("'{}'", n)).collect();
            return Err(FountainError::Argument(format!(
                "{}() missing {} required positional argument{}: {}",
                func.name,
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                names.join(", ")
            )));
        }

        // Parameters bind in declaration order so a default may refer to
        // any parameter to its left.
        let call_env = self.new_env(Some(func.env));
        for (param, slot) in params.iter().zip(supplied) {
            let value = match slot {
                Some(value) => value,
                None => match &param.default {
                    Some(expr) => self.eval_expression(expr, call_env)?,
                    None => unreachable!("missing parameters already rejected"),
                },
            };
            self.env_define(call_env, param.name.clone(), value);
        }

        self.call_depth += 1;
        let result = self.exec_block(&func.declaration.body, call_env);
        self.call_depth -= 1;

        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nil),
            Flow::Break | Flow::Continue => Err(FountainError::ControlFlow {
                message: format!("loop control escaped the body of {}()", func.name),
                location: None,
            }),
        }
    }

    fn expect_table(&self, value: &Value) -> FountainResult<TableId> {
        match value {
            Value::Table(id) => Ok(*id),
            other => Err(FountainError::Type(format!(
                "'{}' value is not indexable",
                type_name(other)
            ))),
        }
    }

    // --- environment arena ---

    fn new_env(&mut self, parent: Option<EnvId>) -> EnvId {
        let id = EnvId(self.envs.len());
        self.envs.push(EnvData {
            values: HashMap::new(),
            parent,
        });
        id
    }

    fn env_get(&self, env: EnvId, name: &str) -> Option<Value> {
        let mut current = Some(env);
        while let Some(id) = current {
            let data = &self.envs[id.0];
            if let Some(value) = data.values.get(name) {
                return Some(value.clone());
            }
            current = data.parent;
        }
        None
    }

    fn env_define(&mut self, env: EnvId, name: String, value: Value) {
        self.envs[env.0].values.insert(name, value);
    }

    /// Update the binding in whichever scope defines `name`; if none does,
    /// the name comes into existence in `env`.
    fn env_assign(&mut self, env: EnvId, name: &str, value: Value) {
        let mut current = Some(env);
        while let Some(id) = current {
            if self.envs[id.0].values.contains_key(name) {
                self.envs[id.0].values.insert(name.to_string(), value);
                return;
            }
            current = self.envs[id.0].parent;
        }
        self.envs[env.0].values.insert(name.to_string(), value);
    }

    // --- table arena ---

    fn new_table(&mut self) -> TableId {
        let id = TableId(self.tables.len());
        self.tables.push(TableData::default());
        id
    }

    fn table_get(&self, id: TableId, key: &Value) -> Option<Value> {
        let data = &self.tables[id.0];
        data.index
            .get(&hash_key(key))
            .map(|&slot| data.entries[slot].1.clone())
    }

    fn table_set(&mut self, id: TableId, key: Value, value: Value) {
        let hashed = hash_key(&key);
        let data = &mut self.tables[id.0];
        match data.index.get(&hashed) {
            Some(&slot) => data.entries[slot].1 = value,
            None => {
                data.index.insert(hashed, data.entries.len());
                data.entries.push((key, value));
            }
        }
    }

    // --- rendering ---

    /// Render a value the way `print` shows it: strings bare at the top
    /// level, quoted and escaped inside tables.
    pub fn stringify(&self, value: &Value) -> String {
        let mut rendering = HashSet::new();
        self.render(value, false, &mut rendering)
    }

    fn render(&self, value: &Value, quote_strings: bool, rendering: &mut HashSet<usize>) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Str(s) => {
                if quote_strings {
                    quote_string(s)
                } else {
                    s.clone()
                }
            }
            Value::Table(id) => self.render_table(*id, rendering),
            Value::Function(func) => format!("<function {}>", func.name),
            Value::Builtin(b) => format!("<built-in function {}>", b.name),
        }
    }

    fn render_table(&self, id: TableId, rendering: &mut HashSet<usize>) -> String {
        if !rendering.insert(id.0) {
            return "{...}".to_string();
        }

        let mut parts = Vec::new();
        let mut auto_index = 0.0;
        for (key, value) in &self.tables[id.0].entries {
            let value_text = self.render(value, true, rendering);
            match key {
                Value::Number(n) if *n == auto_index => {
                    auto_index += 1.0;
                    parts.push(value_text);
                }
                Value::Str(s) if is_identifier(s) => {
                    parts.push(format!("{} = {}", s, value_text));
                }
                other => {
                    let key_text = self.render(other, true, rendering);
                    parts.push(format!("[{}] = {}", key_text, value_text));
                }
            }
        }

        rendering.remove(&id.0);
        format!("{{{}}}", parts.join(", "))
    }
}

fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Nil | Value::Bool(false))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Table(a), Value::Table(b)) => a == b,
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::Str(_) => "string",
        Value::Table(_) => "table",
        Value::Function(_) => "function",
        Value::Builtin(_) => "built-in function",
    }
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// True when `s` renders as a bare `name = value` table key: shaped like an
/// identifier and not a reserved word.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let leads = match chars.next() {
        Some(c) => c.is_ascii_alphabetic() || c == '_',
        None => return false,
    };
    leads
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && lexer::keyword(s).is_none()
}
