//! End-to-end tests over a real socket

mod e2e_project;
mod e2e_session;
