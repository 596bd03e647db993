#![deny(warnings)]

use cloudwatch_syslog::app::Application;

fn main() {
    let code = match Application::prepare() {
        Ok(app) => app.run(),
        Err(code) => code,
    };
    std::process::exit(code);
}
