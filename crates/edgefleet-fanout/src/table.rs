/// Plain-text column table for per-node reports.
#[derive(Debug, Clone)]
pub struct Table {
  headers: Vec<String>,
  rows: Vec<Vec<String>>,
}

impl Table {
  pub fn new<I, S>(headers: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      headers: headers.into_iter().map(Into::into).collect(),
      rows: Vec::new(),
    }
  }

  pub fn row<I, S>(&mut self, cells: I) -> &mut Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.rows.push(cells.into_iter().map(Into::into).collect());
    self
  }

  pub fn render(&self) -> String {
    let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
    for row in &self.rows {
      for (i, cell) in row.iter().enumerate() {
        if i < widths.len() {
          widths[i] = widths[i].max(cell.chars().count());
        }
      }
    }

    let mut out = String::new();
    for line in std::iter::once(&self.headers).chain(self.rows.iter()) {
      let cells: Vec<String> = line
        .iter()
        .zip(&widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect();
      out.push_str(cells.join("  ").trim_end());
      out.push('\n');
    }
    out
  }
}
