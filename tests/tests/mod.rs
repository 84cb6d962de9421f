mod cli;
mod disk_sandbox;
mod session;
