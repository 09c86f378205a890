mod remote_tests;
mod sequence_tests;
mod state_machine_tests;
