use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    toolchat::cli::main()
}
