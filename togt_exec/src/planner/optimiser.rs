//! Optimiser state machine
//!
//! The optimiser is a quasi-Newton (L-BFGS) descent with Armijo backtracking. Rather than a
//! single loop it is expressed as a state machine advanced by `TogtOptimiser::step`, one descent
//! iteration per call, so individual iterations can be inspected and tested.
//!
//! ```text
//! Initializing --> Evaluating --> Evaluating --> ... --> Converged
//!       |              |
//!       +--------------+-------------------------------> Failed
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::{debug, trace};
use nalgebra::DVector;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::minco::MincoError;
use crate::race_params::PlannerParams;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A differentiable objective which can be minimised by the optimiser.
pub trait Objective {
    fn num_vars(&self) -> usize;

    /// Evaluate the objective and its gradient at `x`.
    fn evaluate(&self, x: &DVector<f64>) -> Result<Evaluation, MincoError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The result of evaluating the objective at one point.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Total cost
    pub cost: f64,

    /// The constraint penalty part of the cost
    pub penalty: f64,

    pub grad: DVector<f64>,

    /// Segment durations at this point, empty for objectives without any
    pub times_s: Vec<f64>,
}

/// One accepted point of the optimisation.
#[derive(Debug, Clone)]
pub struct Iterate {
    pub x: DVector<f64>,
    pub eval: Evaluation,

    /// Number of accepted descent steps so far
    pub iteration: usize,

    /// Number of consecutive iterations with negligible relative improvement
    stall_count: usize,

    memory: LbfgsMemory,
}

/// Output of a single step of the optimiser.
#[derive(Debug)]
pub struct StepOutput {
    pub state: OptState,

    /// Segment durations of the current iterate
    pub times_s: Vec<f64>,

    /// Penalty of the current iterate, NaN if there is none
    pub penalty: f64,

    /// True once the state is terminal
    pub done: bool,
}

/// The optimiser, borrowing the objective it minimises.
pub struct TogtOptimiser<'a, O: Objective> {
    objective: &'a O,
    params: PlannerParams,
    deadline: Option<Instant>,
}

/// Limited memory of correction pairs for the L-BFGS direction.
#[derive(Debug, Clone)]
struct LbfgsMemory {
    capacity: usize,
    s: VecDeque<DVector<f64>>,
    y: VecDeque<DVector<f64>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// State of the optimisation.
#[derive(Debug)]
pub enum OptState {
    /// Nothing has been evaluated yet.
    Initializing { x0: DVector<f64> },

    /// At least one point has been evaluated and the optimisation continues.
    Evaluating(Box<Iterate>),

    /// The optimisation has converged.
    Converged(Box<Iterate>, ConvergedReason),

    /// The optimisation stopped without converging. The last accepted iterate is kept if there is
    /// one.
    Failed(Option<Box<Iterate>>, FailureReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConvergedReason {
    /// The relative cost improvement stayed below tolerance.
    RelativeImprovement,

    /// The gradient vanished.
    SmallGradient,

    /// The cost stalled with the penalty below tolerance.
    FeasibleAndStalled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    IterationBudget,
    TimeBudget,

    /// No step along the descent direction decreased the cost.
    LineSearch,

    /// The objective produced a non-finite value at the initial point.
    NonFinite,

    /// The inner minimum snap system could not be solved at the initial point.
    SingularSystem,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl OptState {
    pub fn is_done(&self) -> bool {
        matches!(self, OptState::Converged(..) | OptState::Failed(..))
    }

    /// The current iterate, if any.
    pub fn iterate(&self) -> Option<&Iterate> {
        match self {
            OptState::Initializing { .. } => None,
            OptState::Evaluating(it) => Some(it.as_ref()),
            OptState::Converged(it, _) => Some(it.as_ref()),
            OptState::Failed(it, _) => it.as_deref(),
        }
    }
}

impl<'a, O: Objective> TogtOptimiser<'a, O> {
    /// Create a new optimiser. The wall clock budget, if any, starts now.
    ///
    /// A budget too large to be represented as a deadline is treated as no budget.
    pub fn new(objective: &'a O, params: &PlannerParams) -> Self {
        let deadline = params
            .max_time_s
            .and_then(|t| Duration::try_from_secs_f64(t).ok())
            .and_then(|d| Instant::now().checked_add(d));

        Self {
            objective,
            params: *params,
            deadline,
        }
    }

    /// Run the optimiser from `x0` until it reaches a terminal state.
    pub fn run(&self, x0: DVector<f64>) -> OptState {
        let mut state = OptState::Initializing { x0 };

        loop {
            let out = self.step(state);
            state = out.state;

            if let Some(it) = state.iterate() {
                let total_s: f64 = out.times_s.iter().sum();
                trace!(
                    "Iteration {}: cost {:.6e}, penalty {:.3e}, duration {:.4} s",
                    it.iteration,
                    it.eval.cost,
                    out.penalty,
                    total_s
                );
                if it.iteration % self.params.log_interval == 0 && !out.done {
                    debug!(
                        "Iteration {}: cost {:.6e}, penalty {:.3e}, duration {:.4} s",
                        it.iteration, it.eval.cost, out.penalty, total_s
                    );
                }
            }

            if out.done {
                return state;
            }
        }
    }

    /// Advance the optimisation by one step.
    ///
    /// Terminal states are returned unchanged.
    pub fn step(&self, state: OptState) -> StepOutput {
        let state = match state {
            OptState::Initializing { x0 } => self.initialise(x0),
            OptState::Evaluating(it) => self.iterate(it),
            terminal => terminal,
        };

        let (times_s, penalty) = match state.iterate() {
            Some(it) => (it.eval.times_s.clone(), it.eval.penalty),
            None => (Vec::new(), std::f64::NAN),
        };

        StepOutput {
            done: state.is_done(),
            state,
            times_s,
            penalty,
        }
    }

    fn initialise(&self, x0: DVector<f64>) -> OptState {
        match self.objective.evaluate(&x0) {
            Ok(eval) if is_finite(&eval) => OptState::Evaluating(Box::new(Iterate {
                x: x0,
                eval,
                iteration: 0,
                stall_count: 0,
                memory: LbfgsMemory::new(self.params.lbfgs_memory),
            })),
            Err(MincoError::Singular) => OptState::Failed(None, FailureReason::SingularSystem),
            _ => OptState::Failed(None, FailureReason::NonFinite),
        }
    }

    fn iterate(&self, mut it: Box<Iterate>) -> OptState {
        if it.iteration >= self.params.max_iterations {
            return OptState::Failed(Some(it), FailureReason::IterationBudget);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return OptState::Failed(Some(it), FailureReason::TimeBudget);
            }
        }
        if it.eval.grad.amax() < self.params.grad_tolerance {
            return OptState::Converged(it, ConvergedReason::SmallGradient);
        }

        let grad = it.eval.grad.clone();
        let mut dir = it.memory.direction(&grad);
        let mut slope = dir.dot(&grad);
        if !(slope < 0.0) {
            it.memory.clear();
            dir = -&grad;
            slope = dir.dot(&grad);
        }

        // Without curvature information the first trial step is kept short
        let mut alpha = if it.memory.is_empty() {
            1.0 / grad.norm().max(1.0)
        } else {
            1.0
        };

        let mut accepted = None;
        for _ in 0..self.params.max_backtracks {
            let x_new = &it.x + &dir * alpha;
            if let Ok(eval) = self.objective.evaluate(&x_new) {
                if is_finite(&eval)
                    && eval.cost <= it.eval.cost + self.params.armijo_c * alpha * slope
                {
                    accepted = Some((x_new, eval));
                    break;
                }
            }
            alpha *= self.params.backtrack_factor;
        }

        let (x_new, eval) = match accepted {
            Some(a) => a,
            None => return OptState::Failed(Some(it), FailureReason::LineSearch),
        };

        let s = &x_new - &it.x;
        let y = &eval.grad - &it.eval.grad;
        it.memory.push(s, y);

        let rel_improvement =
            (it.eval.cost - eval.cost) / it.eval.cost.abs().max(std::f64::MIN_POSITIVE);
        if rel_improvement < self.params.rel_tolerance {
            it.stall_count += 1;
        } else {
            it.stall_count = 0;
        }

        it.x = x_new;
        it.eval = eval;
        it.iteration += 1;

        if it.stall_count >= self.params.stall_iterations {
            let reason = if it.eval.penalty <= self.params.penalty_tolerance {
                ConvergedReason::FeasibleAndStalled
            } else {
                ConvergedReason::RelativeImprovement
            };
            return OptState::Converged(it, reason);
        }

        OptState::Evaluating(it)
    }
}

impl LbfgsMemory {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            s: VecDeque::with_capacity(capacity),
            y: VecDeque::with_capacity(capacity),
        }
    }

    fn is_empty(&self) -> bool {
        self.s.is_empty()
    }

    fn clear(&mut self) {
        self.s.clear();
        self.y.clear();
    }

    /// Store a correction pair, pairs without positive curvature are dropped.
    fn push(&mut self, s: DVector<f64>, y: DVector<f64>) {
        let sy = s.dot(&y);
        if !(sy > std::f64::EPSILON * y.norm_squared()) {
            return;
        }

        if self.s.len() == self.capacity {
            self.s.pop_front();
            self.y.pop_front();
        }
        self.s.push_back(s);
        self.y.push_back(y);
    }

    /// Two loop recursion, returns the descent direction `-H g`.
    fn direction(&self, grad: &DVector<f64>) -> DVector<f64> {
        let mut q = grad.clone();
        let mut alphas = Vec::with_capacity(self.s.len());

        for (s, y) in self.s.iter().zip(self.y.iter()).rev() {
            let rho = 1.0 / y.dot(s);
            let alpha = rho * s.dot(&q);
            q.axpy(-alpha, y, 1.0);
            alphas.push((rho, alpha));
        }

        let gamma = match (self.s.back(), self.y.back()) {
            (Some(s), Some(y)) => s.dot(y) / y.norm_squared(),
            _ => 1.0,
        };
        let mut r = q * gamma;

        for ((s, y), (rho, alpha)) in self.s.iter().zip(self.y.iter()).zip(alphas.iter().rev()) {
            let beta = rho * y.dot(&r);
            r.axpy(alpha - beta, s, 1.0);
        }

        -r
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn is_finite(eval: &Evaluation) -> bool {
    eval.cost.is_finite() && eval.grad.iter().all(|g| g.is_finite())
}

#[cfg(test)]
mod test {
    use super::*;

    /// Rosenbrock function in 2D, minimum at (1, 1).
    struct Rosenbrock;

    impl Objective for Rosenbrock {
        fn num_vars(&self) -> usize {
            2
        }

        fn evaluate(&self, x: &DVector<f64>) -> Result<Evaluation, MincoError> {
            let (a, b) = (x[0], x[1]);
            Ok(Evaluation {
                cost: (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2),
                penalty: 0.0,
                grad: DVector::from_vec(vec![
                    -2.0 * (1.0 - a) - 400.0 * a * (b - a * a),
                    200.0 * (b - a * a),
                ]),
                times_s: vec![a.exp()],
            })
        }
    }

    /// An objective which cannot be evaluated.
    struct Broken;

    impl Objective for Broken {
        fn num_vars(&self) -> usize {
            1
        }

        fn evaluate(&self, _: &DVector<f64>) -> Result<Evaluation, MincoError> {
            Err(MincoError::Singular)
        }
    }

    fn test_params() -> PlannerParams {
        let mut params = PlannerParams::default();
        params.max_iterations = 2000;
        params.rel_tolerance = 1e-14;
        params.grad_tolerance = 1e-6;
        params
    }

    #[test]
    fn test_rosenbrock() {
        let params = test_params();
        let opt = TogtOptimiser::new(&Rosenbrock, &params);
        let state = opt.run(DVector::from_vec(vec![-1.2, 1.0]));

        assert!(matches!(state, OptState::Converged(..)));
        let it = state.iterate().unwrap();
        assert!((it.x[0] - 1.0).abs() < 1e-3);
        assert!((it.x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_single_steps() {
        let params = test_params();
        let opt = TogtOptimiser::new(&Rosenbrock, &params);

        let out = opt.step(OptState::Initializing {
            x0: DVector::from_vec(vec![-1.2, 1.0]),
        });
        assert!(!out.done);
        assert_eq!(out.times_s.len(), 1);
        let cost_0 = out.state.iterate().unwrap().eval.cost;

        // Every accepted step decreases the cost
        let mut state = out.state;
        let mut prev = cost_0;
        for _ in 0..10 {
            let out = opt.step(state);
            state = out.state;
            let cost = state.iterate().unwrap().eval.cost;
            assert!(cost <= prev);
            prev = cost;
        }
        assert!(prev < cost_0);
    }

    #[test]
    fn test_terminal_unchanged() {
        let params = test_params();
        let opt = TogtOptimiser::new(&Rosenbrock, &params);
        let out = opt.step(OptState::Failed(None, FailureReason::TimeBudget));
        assert!(out.done);
        assert!(out.penalty.is_nan());
        assert!(matches!(
            out.state,
            OptState::Failed(None, FailureReason::TimeBudget)
        ));
    }

    #[test]
    fn test_iteration_budget() {
        let mut params = test_params();
        params.max_iterations = 3;
        let opt = TogtOptimiser::new(&Rosenbrock, &params);
        let state = opt.run(DVector::from_vec(vec![-1.2, 1.0]));
        assert!(matches!(
            state,
            OptState::Failed(Some(_), FailureReason::IterationBudget)
        ));
        assert_eq!(state.iterate().unwrap().iteration, 3);
    }

    #[test]
    fn test_time_budget() {
        let mut params = test_params();
        params.max_time_s = Some(1e-9);
        let opt = TogtOptimiser::new(&Rosenbrock, &params);
        std::thread::sleep(Duration::from_millis(1));

        let state = opt.run(DVector::from_vec(vec![-1.2, 1.0]));
        assert!(matches!(
            state,
            OptState::Failed(Some(_), FailureReason::TimeBudget)
        ));
        assert_eq!(state.iterate().unwrap().iteration, 0);
    }

    #[test]
    fn test_unrepresentable_time_budget() {
        // Too far in the future to be a deadline, runs as if there were no budget
        for t in [1e30, 1e15].iter() {
            let mut params = test_params();
            params.max_time_s = Some(*t);
            let opt = TogtOptimiser::new(&Rosenbrock, &params);
            let state = opt.run(DVector::from_vec(vec![-1.2, 1.0]));
            assert!(matches!(state, OptState::Converged(..)));
        }
    }

    #[test]
    fn test_singular_start() {
        let params = test_params();
        let opt = TogtOptimiser::new(&Broken, &params);
        let state = opt.run(DVector::zeros(1));
        assert!(matches!(
            state,
            OptState::Failed(None, FailureReason::SingularSystem)
        ));
    }

    #[test]
    fn test_deterministic() {
        let params = test_params();
        let opt = TogtOptimiser::new(&Rosenbrock, &params);
        let a = opt.run(DVector::from_vec(vec![-1.2, 1.0]));
        let b = opt.run(DVector::from_vec(vec![-1.2, 1.0]));
        assert_eq!(a.iterate().unwrap().x, b.iterate().unwrap().x);
        assert_eq!(a.iterate().unwrap().iteration, b.iterate().unwrap().iteration);
    }
}
