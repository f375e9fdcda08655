// src/banner.rs

/// Prints the application startup banner to the console.
pub fn print_banner() {
    let banner = r#"
               _
  ___ ___   __| | ___ _ __ _   _ _ __
 / __/ _ \ / _` |/ _ \ '__| | | | '_ \
| (_| (_) | (_| |  __/ |  | |_| | | | |
 \___\___/ \__,_|\___|_|   \__,_|_| |_|

    Python Exercise Runner
"#;
    println!("{}", banner);
}
