use indicatif::ProgressStyle;

pub mod assign;

pub fn default_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(
            "{elapsed_precise} {span_name} {span_fields} {bar:40.cyan/pink} {pos:>7}/{len:7} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}
