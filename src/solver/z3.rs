use super::{SatResult, Solver};
use crate::symbolic::{Assignment, BinaryOp, Expr, SymbolicValue, TernaryOp, UnaryOp, Word};
use log::warn;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};
use z3_solver::{
    ast::{Ast, Bool, BV},
    Config, Context, FuncDecl, Params, SatResult as Z3SatResult, Solver as Z3Session, Sort,
};

const WIDTH: u32 = 256;

pub struct Z3Solver {
    context: &'static Context,
    solver: Z3Session<'static>,
    translation: HashMap<SymbolicValue, BV<'static>>,
    inputs: BTreeMap<Arc<str>, BV<'static>>,
    hashes: HashMap<usize, FuncDecl<'static>>,
    zero: BV<'static>,
    one: BV<'static>,
}

impl Solver for Z3Solver {
    fn name() -> &'static str {
        "Z3"
    }

    fn new(timeout: Duration) -> Self {
        let config = Config::new();
        let context = Context::new(&config);
        // TODO: one context leaks per worker, own it next to the session instead
        // once the translation cache no longer borrows it for 'static
        let leak: &'static Context = Box::leak(Box::new(context));

        let solver = Z3Session::new(leak);
        let mut params = Params::new(leak);
        params.set_u32("timeout", u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        solver.set_params(&params);

        Self {
            context: leak,
            solver,
            translation: HashMap::new(),
            inputs: BTreeMap::new(),
            hashes: HashMap::new(),
            zero: BV::from_u64(leak, 0, WIDTH),
            one: BV::from_u64(leak, 1, WIDTH),
        }
    }

    fn push(&mut self) {
        self.solver.push();
    }

    fn pop(&mut self, n: usize) {
        self.solver.pop(n as u32);
    }

    fn assert(&mut self, predicate: &SymbolicValue) {
        let bv = self.visit(predicate);
        let holds = bv._eq(&self.zero).not();

        self.solver.assert(&holds);
    }

    fn check_impl(&mut self) -> SatResult {
        match self.solver.check() {
            Z3SatResult::Sat => SatResult::Sat,
            Z3SatResult::Unsat => SatResult::Unsat,
            Z3SatResult::Unknown => SatResult::Unknown,
        }
    }

    fn model(&mut self) -> Option<Assignment> {
        let model = self.solver.get_model()?;

        Some(
            self.inputs
                .iter()
                .filter_map(|(name, bv)| {
                    let value = model.eval(bv, true)?;
                    parse_numeral(&value.to_string()).map(|v| (name.clone(), v))
                })
                .collect(),
        )
    }
}

fn parse_numeral(numeral: &str) -> Option<Word> {
    let parsed = if let Some(hex) = numeral.strip_prefix("#x") {
        Word::from_str_radix(hex, 16)
    } else if let Some(bin) = numeral.strip_prefix("#b") {
        Word::from_str_radix(bin, 2)
    } else {
        Word::from_str_radix(numeral, 10)
    };

    match parsed {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("could not read model value {}", numeral);
            None
        }
    }
}

impl Z3Solver {
    fn constant(&self, value: Word) -> BV<'static> {
        // limbs are little endian, concat puts its receiver in the high bits
        let limbs = value.as_limbs();

        limbs
            .iter()
            .rev()
            .map(|limb| BV::from_u64(self.context, *limb, 64))
            .reduce(|high, low| high.concat(&low))
            .unwrap_or_else(|| self.zero.clone())
    }

    fn boolean(&self, condition: Bool<'static>) -> BV<'static> {
        condition.ite(&self.one, &self.zero)
    }

    fn is_zero(&self, bv: &BV<'static>) -> Bool<'static> {
        bv._eq(&self.zero)
    }

    fn visit(&mut self, value: &SymbolicValue) -> BV<'static> {
        if let Some(bv) = self.translation.get(value) {
            return bv.clone();
        }

        let bv = self.translate(value);
        self.translation.insert(value.clone(), bv.clone());

        bv
    }

    fn translate(&mut self, value: &SymbolicValue) -> BV<'static> {
        match &**value {
            Expr::Const(c) => self.constant(*c),
            Expr::Input(name) => {
                let bv = BV::new_const(self.context, name.as_ref(), WIDTH);
                self.inputs.insert(name.clone(), bv.clone());
                bv
            }
            Expr::Unary(UnaryOp::IsZero, a) => {
                let a = self.visit(a);
                self.boolean(self.is_zero(&a))
            }
            Expr::Unary(UnaryOp::Not, a) => self.visit(a).bvnot(),
            Expr::Binary(op, a, b) => {
                let (a, b) = (self.visit(a), self.visit(b));
                self.translate_binary(*op, a, b)
            }
            Expr::Ternary(op, a, b, c) => {
                let (a, b, c) = (self.visit(a), self.visit(b), self.visit(c));

                match op {
                    TernaryOp::Ite => self.is_zero(&a).ite(&c, &b),
                    TernaryOp::AddMod | TernaryOp::MulMod => {
                        let (a, b, n) = (a.zero_ext(WIDTH), b.zero_ext(WIDTH), c.zero_ext(WIDTH));
                        let wide = if *op == TernaryOp::AddMod {
                            a.bvadd(&b)
                        } else {
                            a.bvmul(&b)
                        };
                        let result = wide.bvurem(&n).extract(WIDTH - 1, 0);

                        self.is_zero(&c).ite(&self.zero, &result)
                    }
                }
            }
            Expr::Keccak(args) => {
                let args = args.iter().map(|a| self.visit(a)).collect::<Vec<_>>();
                let context = self.context;

                let decl = self.hashes.entry(args.len()).or_insert_with(|| {
                    let domain = vec![Sort::bitvector(context, WIDTH); args.len()];
                    let domain = domain.iter().collect::<Vec<_>>();

                    FuncDecl::new(
                        context,
                        format!("keccak{}", args.len()),
                        &domain,
                        &Sort::bitvector(context, WIDTH),
                    )
                });

                let args = args.iter().map(|a| a as &dyn Ast<'static>).collect::<Vec<_>>();

                decl.apply(&args)
                    .as_bv()
                    .expect("keccak is declared over bit-vectors")
            }
        }
    }

    fn translate_binary(&mut self, op: BinaryOp, a: BV<'static>, b: BV<'static>) -> BV<'static> {
        let zero = self.zero.clone();
        let b_is_zero = self.is_zero(&b);

        match op {
            BinaryOp::Add => a.bvadd(&b),
            BinaryOp::Sub => a.bvsub(&b),
            BinaryOp::Mul => a.bvmul(&b),
            BinaryOp::Div => b_is_zero.ite(&zero, &a.bvudiv(&b)),
            BinaryOp::SDiv => b_is_zero.ite(&zero, &a.bvsdiv(&b)),
            BinaryOp::Mod => b_is_zero.ite(&zero, &a.bvurem(&b)),
            BinaryOp::SMod => b_is_zero.ite(&zero, &a.bvsrem(&b)),
            BinaryOp::Lt => self.boolean(a.bvult(&b)),
            BinaryOp::Gt => self.boolean(a.bvugt(&b)),
            BinaryOp::SLt => self.boolean(a.bvslt(&b)),
            BinaryOp::SGt => self.boolean(a.bvsgt(&b)),
            BinaryOp::Eq => self.boolean(a._eq(&b)),
            BinaryOp::And => a.bvand(&b),
            BinaryOp::Or => a.bvor(&b),
            BinaryOp::Xor => a.bvxor(&b),
            BinaryOp::Shl => b.bvshl(&a),
            BinaryOp::Shr => b.bvlshr(&a),
            BinaryOp::Sar => b.bvashr(&a),
            BinaryOp::Byte => {
                let in_range = a.bvult(&BV::from_u64(self.context, 32, WIDTH));
                let shift = BV::from_u64(self.context, 31, WIDTH)
                    .bvsub(&a)
                    .bvmul(&BV::from_u64(self.context, 8, WIDTH));
                let extracted = b
                    .bvlshr(&shift)
                    .bvand(&BV::from_u64(self.context, 0xff, WIDTH));

                in_range.ite(&extracted, &zero)
            }
            BinaryOp::SignExtend => {
                let mut result = b.clone();

                // size selects one of 31 possible extension points
                for size in (0..31_u32).rev() {
                    let bits = (size + 1) * 8;
                    let extended = b.extract(bits - 1, 0).sign_ext(WIDTH - bits);
                    let selected = a._eq(&BV::from_u64(self.context, size as u64, WIDTH));
                    result = selected.ite(&extended, &result);
                }

                result
            }
            BinaryOp::Exp => {
                let decl = FuncDecl::new(
                    self.context,
                    "exp",
                    &[
                        &Sort::bitvector(self.context, WIDTH),
                        &Sort::bitvector(self.context, WIDTH),
                    ],
                    &Sort::bitvector(self.context, WIDTH),
                );

                decl.apply(&[&a as &dyn Ast<'static>, &b as &dyn Ast<'static>])
                    .as_bv()
                    .expect("exp is declared over bit-vectors")
            }
        }
    }
}
