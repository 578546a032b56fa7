mod async_tests;
mod control_flow_tests;
mod parity_tests;
