mod selector_test;
mod state_machine_test;
