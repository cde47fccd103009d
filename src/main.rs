mod cmdline;
mod driver;

use dass_utils::MultiError;

fn main() -> Result<(), MultiError> {
    driver::run_compiler()
}
