use crate::core::config::Config;

pub fn list_providers(config: &Config) {
    if config.providers.is_empty() {
        println!("No tool providers configured.");
        println!("Add [[providers]] entries to the config file to enable tools.");
        return;
    }
    print!("{}", providers_table(config));
}

fn providers_table(config: &Config) -> String {
    let mut table = String::from("Configured Tool Providers:\n\n");
    table.push_str("| Provider | Display Name | Command | Enabled |\n");
    table.push_str("|---|---|---|:---:|\n");

    for provider in &config.providers {
        let enabled = if provider.is_enabled() { "✅" } else { "❌" };
        let mut command = provider.command.clone();
        for arg in &provider.args {
            command.push(' ');
            command.push_str(arg);
        }
        table.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            provider.id,
            provider.display_name(),
            command,
            enabled
        ));
    }

    if config.providers.iter().any(|p| !p.is_enabled()) {
        table.push_str("\nDisabled providers start only with --enable <ID>.\n");
    }
    table
}
