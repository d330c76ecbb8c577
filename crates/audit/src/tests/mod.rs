mod auditor_tests;
mod helpers;
