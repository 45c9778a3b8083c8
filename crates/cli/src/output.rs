//! Terminal status lines

use colored::Colorize;

pub fn success(message: &str) {
    println!("{} {}", "✔".green().bold(), message);
}

pub fn failure(message: &str) {
    eprintln!("{} {}", "✘".red().bold(), message);
}

pub fn step(message: &str) {
    println!("{} {}", "→".cyan(), message);
}
