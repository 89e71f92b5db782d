// member ids of the gene tree, whitespace separated over any number of lines
pub fn parse_tree_selection(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_over_lines_and_tabs() {
        let ids = parse_tree_selection("PFA_0001.1 PF3D7_0100100\n\tPBANKA_0100100.1:pep\n\n");
        assert_eq!(ids, vec!["PFA_0001.1", "PF3D7_0100100", "PBANKA_0100100.1:pep"]);
        assert!(parse_tree_selection(" \n").is_empty());
    }
}
