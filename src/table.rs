use std::fmt::Write as _;

/// Renders a left-aligned console table with a dashed separator under the
/// header row. Control characters in cells are flattened to spaces.
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(cell.chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separator: Vec<String> = widths.iter().map(|w| "-".repeat((*w).max(3))).collect();
    let _ = writeln!(output, "{}", format_row(&separator, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut cells = Vec::with_capacity(values.len());
    for (idx, value) in values.iter().enumerate().take(widths.len()) {
        let sanitized: String = value
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        let padding = widths[idx].saturating_sub(sanitized.chars().count());
        cells.push(format!("{sanitized}{}", " ".repeat(padding)));
    }
    let mut line = cells.join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_align_to_widest_cell() {
        let headers = vec!["col".to_string(), "kind".to_string()];
        let rows = vec![vec!["revenue".to_string(), "numeric".to_string()]];
        let rendered = render_table(&headers, &rows);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "col      kind");
        assert!(lines[1].starts_with("---"));
        assert_eq!(lines[2], "revenue  numeric");
    }
}
