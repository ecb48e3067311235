mod convergence;
mod double_buy;
mod error_cases;
mod relay;
mod trade_flow;
