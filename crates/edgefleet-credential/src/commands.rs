/// Shell commands that manage a node's authorized key list.
///
/// Every command must be idempotent: appending a key already present and
/// removing one already absent both succeed without change.
pub trait KeyStoreCommands: Send + Sync {
  fn append(&self, public_key: &str) -> String;
  fn remove(&self, public_key: &str) -> String;
  /// Print one authorized key per line.
  fn list(&self) -> String;
}

/// OpenSSH `~/.ssh/authorized_keys` of the login user.
///
/// Keys are matched on type and key data only, so a re-added key with a
/// different comment is not duplicated.
#[derive(Debug, Clone)]
pub struct AuthorizedKeysFile {
  path: String,
}

impl Default for AuthorizedKeysFile {
  fn default() -> Self {
    Self {
      path: "$HOME/.ssh/authorized_keys".to_string(),
    }
  }
}

impl AuthorizedKeysFile {
  pub fn at(path: impl Into<String>) -> Self {
    Self { path: path.into() }
  }
}

impl KeyStoreCommands for AuthorizedKeysFile {
  fn append(&self, public_key: &str) -> String {
    format!(
      "umask 077; f=\"{path}\"; mkdir -p \"$(dirname \"$f\")\" && touch \"$f\" && \
       {{ grep -qF {needle} \"$f\" || printf '%s\\n' {line} >> \"$f\"; }}",
      path = self.path,
      needle = quote(&key_id(public_key)),
      line = quote(public_key.trim()),
    )
  }

  /// The file is only replaced when grep read it cleanly (exit 0 or 1) and
  /// at least one key survives; removing the last key is refused.
  fn remove(&self, public_key: &str) -> String {
    format!(
      "f=\"{path}\"; t=\"$f.edgefleet\"; [ -f \"$f\" ] || exit 0; \
       grep -vF {needle} \"$f\" > \"$t\"; rc=$?; \
       [ $rc -le 1 ] || {{ rm -f \"$t\"; exit $rc; }}; \
       grep -q . \"$t\" || {{ rm -f \"$t\"; echo 'refusing to remove the last authorized key' >&2; exit 3; }}; \
       chmod 600 \"$t\" && mv \"$t\" \"$f\"",
      path = self.path,
      needle = quote(&key_id(public_key)),
    )
  }

  fn list(&self) -> String {
    format!("cat \"{}\" 2>/dev/null || true", self.path)
  }
}

fn key_id(public_key: &str) -> String {
  public_key.split_whitespace().take(2).collect::<Vec<_>>().join(" ")
}

/// Single-quote for POSIX sh.
fn quote(s: &str) -> String {
  format!("'{}'", s.replace('\'', r"'\''"))
}
