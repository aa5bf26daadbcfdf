use csms::Role;
use csms::login::UserDirectory;
use std::env;
use std::path::PathBuf;
use std::process;

/// Set one account's role from the command line.
///
/// # Environment
/// * `TARGET_USER_ID` - id of the account to change (required)
/// * `TARGET_ROLE` - `Edit` or `View`, defaults to `View`
/// * `CSMS_DATA_DIR` - directory holding `users.json`, defaults to `database`
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let user_id = match env::var("TARGET_USER_ID") {
        Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => {
            eprintln!("TARGET_USER_ID is required");
            process::exit(1);
        }
    };

    let role: Role = match env::var("TARGET_ROLE").unwrap_or_else(|_| "View".to_string()).parse() {
        Ok(role) => role,
        Err(_) => {
            eprintln!("TARGET_ROLE must be Edit or View");
            process::exit(1);
        }
    };

    let data_dir = PathBuf::from(env::var("CSMS_DATA_DIR").unwrap_or_else(|_| "database".to_string()));
    let result = UserDirectory::open(&data_dir).and_then(|users| users.set_role(&user_id, role));

    match result {
        Ok(user) => println!("Updated {} ({}) to role {}", user.email, user.id, user.role),
        Err(e) => {
            eprintln!("Failed to update role: {}", e);
            process::exit(1);
        }
    }
}
