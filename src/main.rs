use crate::shell::start_shell;

mod shell;

fn main() {
    shell::logger::init();
    start_shell();
}
